//! Message channel between the operator and the agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who wrote an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Agent,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// A message in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn operator(text: impl Into<String>) -> Self {
        Self::new(Role::Operator, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text)
    }
}

/// Ordered operator/agent history, with a read cursor for the console
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<ChatEntry>,
    #[serde(default)]
    read: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ChatEntry) {
        debug!("[{}] {}", entry.role, entry.text);
        self.entries.push(entry);
    }

    pub fn operator(&mut self, text: impl Into<String>) {
        self.push(ChatEntry::operator(text));
    }

    pub fn agent(&mut self, text: impl Into<String>) {
        self.push(ChatEntry::agent(text));
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn agent_entries(&self) -> Vec<&ChatEntry> {
        self.entries.iter().filter(|e| e.role == Role::Agent).collect()
    }

    pub fn last_agent(&self) -> Option<&ChatEntry> {
        self.entries.iter().rev().find(|e| e.role == Role::Agent)
    }

    /// Entries appended since the last call
    pub fn take_unread(&mut self) -> Vec<ChatEntry> {
        let unread = self.entries[self.read.min(self.entries.len())..].to_vec();
        self.read = self.entries.len();
        unread
    }
}
