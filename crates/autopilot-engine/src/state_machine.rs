//! Pure state machine for the agent lifecycle
//!
//! This module implements a pure functional state machine with NO I/O.
//! All state transitions are deterministic and testable.
//!
//! Key design principles:
//! - Pure function: transition(state, event) -> (state, actions)
//! - No async, no I/O, no browser
//! - Every accepted event yields exactly one `Action::Announce`
//! - An event the state cannot handle leaves the state as it was and
//!   yields a single `Action::Reject` (never panics)

use autopilot_core::QuestionKind;
use serde::{Deserialize, Serialize};

/// Coarse agent lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// No browser session
    #[default]
    Idle,
    /// Credentials submitted, waiting for the operator to finish the challenge
    LoggingIn,
    /// Authenticated, ready for a workflow
    Active,
    /// A run is parked on a yes/no question
    AwaitingConfirmation,
    /// A run is parked on a one-time-code question
    AwaitingOtp,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LoggingIn => write!(f, "logging_in"),
            Self::Active => write!(f, "active"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::AwaitingOtp => write!(f, "awaiting_otp"),
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Browser opened and credentials filled; `instruction` tells the
    /// operator what to do next
    Launch { instruction: String },
    /// Operator says the login is done; `detected` is whether the dashboard
    /// was also seen
    LoginAcknowledged { detected: bool },
    /// Operator started a workflow
    StartWorkflow { description: String },
    /// A workflow parked on a question
    QuestionOpened { kind: QuestionKind, prompt: String },
    /// Operator reply that answers nothing
    UnclearReply,
    /// Operator said no at a confirmation
    Declined,
    /// The run reached a terminal status
    WorkflowFinished { summary: String },
    /// Tear everything down
    Stop,
}

/// Actions to execute as side effects of transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Append an agent entry to the transcript
    Announce { message: String },
    /// The event is not valid now; nothing changed
    Reject { reason: String },
    /// Cancel the current run and drop any open question
    CancelRun,
    /// Close the browser session
    CloseSession,
}

fn announce(message: impl Into<String>) -> Action {
    Action::Announce {
        message: message.into(),
    }
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and actions to execute.
/// This function is completely deterministic and has no side effects.
pub fn transition(state: AgentState, event: AgentEvent) -> (AgentState, Vec<Action>) {
    use AgentState::*;

    match (state, event) {
        (Idle, AgentEvent::Launch { instruction }) => (LoggingIn, vec![announce(instruction)]),

        (LoggingIn, AgentEvent::LoginAcknowledged { detected }) => {
            let message = if detected {
                "Login confirmed. Ready for a workflow."
            } else {
                "Dashboard not detected, continuing on your word. Ready for a workflow."
            };
            (Active, vec![announce(message)])
        }

        (Active, AgentEvent::StartWorkflow { description }) => {
            (Active, vec![announce(format!("Starting {}", description))])
        }

        (Active, AgentEvent::QuestionOpened { kind: QuestionKind::Confirmation, prompt }) => {
            (AwaitingConfirmation, vec![announce(prompt)])
        }

        (AwaitingConfirmation, AgentEvent::QuestionOpened { kind: QuestionKind::OneTimeCode, prompt }) => {
            (AwaitingOtp, vec![announce(prompt)])
        }

        (AwaitingConfirmation, AgentEvent::UnclearReply) => (
            AwaitingConfirmation,
            vec![announce("Please reply yes to go ahead or no to cancel.")],
        ),

        (AwaitingOtp, AgentEvent::UnclearReply) => (
            AwaitingOtp,
            vec![announce("Please type the one-time code exactly as you received it.")],
        ),

        (AwaitingConfirmation, AgentEvent::Declined) => (
            Active,
            vec![
                Action::CancelRun,
                announce("Cancelled. Nothing was submitted."),
            ],
        ),

        (Active | AwaitingConfirmation | AwaitingOtp, AgentEvent::WorkflowFinished { summary }) => {
            (Active, vec![announce(summary)])
        }

        // Stopping is always accepted, also when already stopped
        (_, AgentEvent::Stop) => (
            Idle,
            vec![Action::CancelRun, Action::CloseSession, announce("Agent stopped.")],
        ),

        (state, event) => (
            state,
            vec![Action::Reject {
                reason: rejection(state, &event),
            }],
        ),
    }
}

fn rejection(state: AgentState, event: &AgentEvent) -> String {
    let what = match event {
        AgentEvent::Launch { .. } => "launch",
        AgentEvent::LoginAcknowledged { .. } => "acknowledge login",
        AgentEvent::StartWorkflow { .. } => "start a workflow",
        AgentEvent::QuestionOpened { .. } => "open a question",
        AgentEvent::UnclearReply => "reprompt",
        AgentEvent::Declined => "decline",
        AgentEvent::WorkflowFinished { .. } => "finish a workflow",
        AgentEvent::Stop => "stop",
    };
    let hint = match state {
        AgentState::Idle => "launch the agent first",
        AgentState::LoggingIn => "finish logging in and acknowledge first",
        AgentState::Active => "no question is open",
        AgentState::AwaitingConfirmation | AgentState::AwaitingOtp => {
            "answer the open question or stop first"
        }
    };
    format!("cannot {} while {}; {}", what, state, hint)
}

/// What an operator's free-text message means in the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorIntent {
    /// Yes at a confirmation
    Affirm,
    /// No at a confirmation
    Decline,
    /// The one-time code
    Code(String),
    /// Login is done
    AcknowledgeLogin,
    /// Nothing the open question can use
    Unclear,
    /// No question is open; the text is just conversation
    Informational,
}

const AFFIRMATIVE: &[&str] = &[
    "yes", "y", "yeah", "yep", "ok", "okay", "sure", "confirm", "confirmed", "submit", "proceed",
    "go", "done", "completed", "finished",
];

const NEGATIVE: &[&str] = &["no", "n", "nope", "cancel", "abort", "stop", "don't", "dont"];

const AFFIRMATIVE_PHRASES: &[&str] = &["go ahead", "logged in", "i'm in", "i am in", "i've completed it"];

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase()
}

fn first_word(normalized: &str) -> &str {
    normalized
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or("")
}

pub fn is_affirmative(text: &str) -> bool {
    let normalized = normalize(text);
    AFFIRMATIVE.contains(&first_word(&normalized))
        || AFFIRMATIVE_PHRASES.iter().any(|p| normalized.starts_with(p))
}

pub fn is_negative(text: &str) -> bool {
    let normalized = normalize(text);
    NEGATIVE.contains(&first_word(&normalized))
}

/// Interpret free text against the current state
///
/// Chat text never starts a workflow on its own.
pub fn interpret_reply(state: AgentState, text: &str) -> OperatorIntent {
    match state {
        AgentState::AwaitingConfirmation => {
            if is_negative(text) {
                OperatorIntent::Decline
            } else if is_affirmative(text) {
                OperatorIntent::Affirm
            } else {
                OperatorIntent::Unclear
            }
        }
        AgentState::AwaitingOtp => {
            let code = text.trim();
            if code.is_empty() {
                OperatorIntent::Unclear
            } else {
                OperatorIntent::Code(code.to_string())
            }
        }
        AgentState::LoggingIn if is_affirmative(text) => OperatorIntent::AcknowledgeLogin,
        AgentState::LoggingIn | AgentState::Active | AgentState::Idle => OperatorIntent::Informational,
    }
}
