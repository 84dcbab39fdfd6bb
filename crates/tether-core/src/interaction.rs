//! Interactions: one user turn and the assistant's response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{InteractionId, SessionId};

/// Separator inserted between distinct agent messages in one response.
pub const MESSAGE_SEPARATOR: &str = "\n\n";

/// Lifecycle state of an interaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    /// Waiting for (or receiving) the assistant response.
    #[default]
    Waiting,
    /// The assistant finished the turn.
    Complete,
    /// The turn failed on the agent side.
    Error,
}

/// A single turn within a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique ID.
    pub id: InteractionId,
    /// Owning session.
    pub session_id: SessionId,
    /// User the turn is attributed to.
    pub user_id: String,
    /// Session generation this interaction belongs to.
    pub generation: u64,
    /// User turn content.
    pub prompt: String,
    /// Assistant turn content.
    pub response: String,
    /// Current state.
    pub state: InteractionState,
    /// Error text for [`InteractionState::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last update time.
    pub updated: DateTime<Utc>,
    /// Completion time, set exactly once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    /// Last external message ID applied to `response`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    /// Byte offset into `response` where `last_message_id`'s content begins.
    pub message_offset: usize,
}

impl Interaction {
    /// Create a new waiting interaction.
    pub fn waiting(
        session_id: SessionId,
        user_id: impl Into<String>,
        generation: u64,
        prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InteractionId::new(),
            session_id,
            user_id: user_id.into(),
            generation,
            prompt: prompt.into(),
            response: String::new(),
            state: InteractionState::Waiting,
            error: None,
            created: now,
            updated: now,
            completed: None,
            last_message_id: None,
            message_offset: 0,
        }
    }

    /// Whether the interaction is still open for streaming.
    pub fn is_waiting(&self) -> bool {
        self.state == InteractionState::Waiting
    }

    /// Apply a streamed agent message to the response.
    ///
    /// A repeat of the last message ID replaces everything from the recorded
    /// offset onward. A new message ID is appended after a blank line and
    /// becomes the recorded message.
    pub fn apply_message(&mut self, message_id: &str, content: &str) {
        if self.last_message_id.as_deref() == Some(message_id) {
            let offset = floor_char_boundary(&self.response, self.message_offset);
            self.response.truncate(offset);
            self.response.push_str(content);
            self.message_offset = offset;
        } else {
            if !self.response.is_empty() {
                self.response.push_str(MESSAGE_SEPARATOR);
            }
            self.message_offset = self.response.len();
            self.response.push_str(content);
            self.last_message_id = Some(message_id.to_owned());
        }
        self.updated = Utc::now();
    }

    /// Transition to complete.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.state = InteractionState::Complete;
        self.completed = Some(now);
        self.updated = now;
    }

    /// Transition to error with a message.
    pub fn fail(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.state = InteractionState::Error;
        self.error = Some(error.into());
        self.completed = Some(now);
        self.updated = now;
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
