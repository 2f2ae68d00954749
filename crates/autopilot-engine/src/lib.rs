//! # autopilot-engine
//!
//! Filing agent for the tax portal.
//!
//! This crate provides:
//! - Agent state machine and operator reply interpretation
//! - Human-input gate for confirmations and one-time codes
//! - Workflow engine for notices, both returns and payment challans
//! - Ledger partitioning and return figure calculation
//! - Ledger and notification store adapters
//! - Markdown activity log

mod activity_logger;
mod agent;
mod gate;
mod ledger;
mod state_machine;
mod stores;
mod transcript;
mod workflow;

pub use activity_logger::ActivityLogger;
pub use agent::{Agent, AgentContext, WorkflowRequest};
pub use gate::HumanInputGate;
pub use ledger::{entered_split, net_payable, partition, return_b_figures, Partition};
pub use state_machine::{
    interpret_reply, is_affirmative, is_negative, transition, Action, AgentEvent, AgentState,
    OperatorIntent,
};
pub use stores::{
    JsonLedger, JsonNotificationStore, LedgerSource, MemoryLedger, MemoryNotificationStore,
    NotificationSink,
};
pub use transcript::{ChatEntry, Role, Transcript};
pub use workflow::{
    describe, parse_notice_rows, terminal_summary, EntrySummary, NoticeScan, RunProgress,
    WorkflowEngine,
};
