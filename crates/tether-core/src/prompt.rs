//! Durably queued prompts awaiting delivery to an agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PromptId, SessionId};

/// Delivery status of a queued prompt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    /// Waiting to be sent.
    #[default]
    Pending,
    /// Handed to the agent connection.
    Sent,
    /// Delivery failed. Only a later ready signal or a manual resend retries it.
    Failed,
}

impl std::fmt::Display for PromptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An instruction queued for a session's agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptHistoryEntry {
    /// Unique ID.
    pub id: PromptId,
    /// Target session.
    pub session_id: SessionId,
    /// Prompt text.
    pub content: String,
    /// Delivery status.
    pub status: PromptStatus,
    /// Interrupt prompts are only picked up when the agent is idle.
    #[serde(default)]
    pub interrupt: bool,
    /// Queue time. Entries are consumed in this order.
    pub created: DateTime<Utc>,
    /// Last status change.
    pub updated: DateTime<Utc>,
}

impl PromptHistoryEntry {
    /// Create a pending entry.
    pub fn pending(session_id: SessionId, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PromptId::new(),
            session_id,
            content: content.into(),
            status: PromptStatus::Pending,
            interrupt: false,
            created: now,
            updated: now,
        }
    }

    /// Mark the prompt as an interrupt.
    #[must_use]
    pub fn interrupting(mut self) -> Self {
        self.interrupt = true;
        self
    }

    /// Whether a previous delivery attempt failed.
    pub fn is_retry(&self) -> bool {
        self.status == PromptStatus::Failed
    }
}
