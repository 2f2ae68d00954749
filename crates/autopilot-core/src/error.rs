//! Unified error types for the autopilot

use thiserror::Error;

/// Unified error type for all autopilot operations
#[derive(Error, Debug)]
pub enum AutopilotError {
    // Browser errors
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),

    // Session errors
    #[error("Session error: {0}")]
    Session(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    // Usage errors: rejected before any browser interaction
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Workflow errors
    #[error("Workflow error: {0}")]
    Workflow(String),

    // Collaborator errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl AutopilotError {
    /// True for usage errors that must leave state untouched
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::InvalidTransition { .. })
    }
}

/// Result type alias using AutopilotError
pub type Result<T> = std::result::Result<T, AutopilotError>;
