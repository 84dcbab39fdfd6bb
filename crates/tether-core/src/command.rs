//! Outbound commands pushed to agent connections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DeliveryError;
use crate::ids::{SessionId, ThreadId};

/// Command type for a chat turn the agent should answer.
pub const CHAT_MESSAGE: &str = "chat_message";

/// A structured command sent to an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalAgentCommand {
    /// Command type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ExternalAgentCommand {
    /// Build a command from a type tag and payload.
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Stamp the target session into the payload.
    pub fn set_session(&mut self, session_id: &SessionId) {
        let _ = self
            .data
            .insert("session_id".into(), Value::String(session_id.to_string()));
    }

    /// A string field of the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, DeliveryError> {
        serde_json::to_string(self).map_err(|e| DeliveryError::Encode(e.to_string()))
    }
}

/// Builder for a `chat_message` command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatMessage {
    message: String,
    request_id: String,
    thread_id: Option<ThreadId>,
    agent_name: Option<String>,
    role: Option<String>,
    from_queue: bool,
    is_continue: bool,
}

impl ChatMessage {
    /// A chat turn correlated by `request_id`.
    pub fn new(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    /// Continue an existing agent thread. `None` asks the agent to open one.
    #[must_use]
    pub fn thread(mut self, thread_id: Option<ThreadId>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Name of the agent implementation that should answer.
    #[must_use]
    pub fn agent_name(mut self, name: Option<String>) -> Self {
        self.agent_name = name;
        self
    }

    /// Author role of the message.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Mark the message as drained from the durable prompt queue.
    #[must_use]
    pub fn from_queue(mut self) -> Self {
        self.from_queue = true;
        self
    }

    /// Mark the message as a resume prompt after an agent restart.
    #[must_use]
    pub fn continuation(mut self) -> Self {
        self.is_continue = true;
        self
    }

    /// Build the wire command.
    pub fn into_command(self) -> ExternalAgentCommand {
        let mut data = Map::new();
        let _ = data.insert("message".into(), Value::String(self.message));
        let _ = data.insert("request_id".into(), Value::String(self.request_id));
        let _ = data.insert(
            "acp_thread_id".into(),
            self.thread_id
                .map_or(Value::Null, |t| Value::String(t.into_inner())),
        );
        if let Some(name) = self.agent_name {
            let _ = data.insert("agent_name".into(), Value::String(name));
        }
        if let Some(role) = self.role {
            let _ = data.insert("role".into(), Value::String(role));
        }
        if self.from_queue {
            let _ = data.insert("from_queue".into(), Value::Bool(true));
        }
        if self.is_continue {
            let _ = data.insert("is_continue".into(), Value::Bool(true));
        }
        ExternalAgentCommand::new(CHAT_MESSAGE, data)
    }
}
