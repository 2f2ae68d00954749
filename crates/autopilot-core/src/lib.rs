//! # autopilot-core
//!
//! Core types for the portal filing autopilot.
//!
//! The autopilot drives an operator-supervised browser session against the tax
//! portal. Everything that has to be shared between the browser layer, the
//! workflow engine and the CLI lives here:
//!
//! - The data model (workflow runs, pending questions, ledger rows, notices)
//! - The unified error type
//! - Repository-level configuration (`.autopilot/config.toml`)
//! - Fail-open helpers for infrastructure side effects

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::AutopilotConfig;
pub use error::{AutopilotError, Result};
pub use types::*;
