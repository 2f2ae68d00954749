//! Human-input gate
//!
//! A single question/answer rendezvous. The workflow parks a question here and
//! returns; the operator's reply takes the question back out, resolved, and
//! whoever took it resumes the workflow. Taking is the only way out, so a
//! question is resumed at most once.

use autopilot_core::{AutopilotError, PendingQuestion, QuestionKind, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanInputGate {
    pending: Option<PendingQuestion>,
}

impl HumanInputGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a question. Fails if one is already open.
    pub fn ask(&mut self, kind: QuestionKind, prompt: impl Into<String>) -> Result<&PendingQuestion> {
        if let Some(open) = &self.pending {
            return Err(AutopilotError::Protocol(format!(
                "question {} is still open; resolve or cancel it first",
                open.id
            )));
        }
        let question = PendingQuestion::new(kind, prompt);
        info!("Waiting for operator ({:?}): {}", question.kind, question.prompt);
        Ok(self.pending.insert(question))
    }

    /// Resolve the open question with `reply` and hand it to the caller
    pub fn receive_reply(&mut self, reply: impl Into<String>) -> Result<PendingQuestion> {
        let mut question = self
            .pending
            .take()
            .ok_or_else(|| AutopilotError::Protocol("no question is waiting for a reply".to_string()))?;
        question.answer = Some(reply.into());
        debug!("Question {} resolved", question.id);
        Ok(question)
    }

    pub fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingQuestion> {
        self.pending.as_ref()
    }

    /// Drop the open question, if any
    pub fn cancel(&mut self) -> Option<PendingQuestion> {
        let dropped = self.pending.take();
        if let Some(q) = &dropped {
            debug!("Question {} cancelled", q.id);
        }
        dropped
    }
}
