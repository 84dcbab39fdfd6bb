//! Inbound sync messages and their typed decoding.
//!
//! Agents send [`SyncMessage`] frames: an `event_type` tag, an optional
//! originating session hint, and a free-form `data` object. [`SyncMessage::decode`]
//! validates the fields required by each event type once, at the boundary, and
//! produces a [`SyncEvent`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;
use crate::ids::{RequestId, SessionId, ThreadId};

/// Raw inbound event as sent by the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Originating platform session, when the agent knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Event type tag.
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl SyncMessage {
    /// Build a message from a type tag and a JSON object payload.
    ///
    /// Non-object payloads produce an empty `data` map.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            session_id: None,
            event_type: event_type.into(),
            data,
        }
    }

    /// Attach an originating session hint.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// The session hint, if present and non-empty.
    pub fn session_hint(&self) -> Option<SessionId> {
        self.session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(SessionId::from)
    }

    /// Validate and convert into a typed event.
    pub fn decode(&self) -> Result<SyncEvent, ValidationError> {
        let f = Fields {
            event: &self.event_type,
            data: &self.data,
        };
        let event = match self.event_type.as_str() {
            "thread_created" | "context_created" => SyncEvent::ThreadCreated {
                thread_id: f.thread_id()?,
                title: f.optional_non_empty("title"),
                request_id: f.optional_non_empty("request_id").map(RequestId::from),
            },
            "user_created_thread" => SyncEvent::UserCreatedThread {
                thread_id: f.thread_id()?,
                title: f.optional_non_empty("title"),
            },
            "thread_title_changed" => SyncEvent::ThreadTitleChanged {
                thread_id: f.thread_id()?,
                title: f.string("title")?,
            },
            "message_added" => SyncEvent::MessageAdded(MessageAdded {
                thread_id: f.thread_id()?,
                message_id: f.non_empty("message_id")?,
                content: f.string("content")?,
                role: f.role()?,
            }),
            "message_completed" => SyncEvent::MessageCompleted {
                thread_id: f.thread_id()?,
                request_id: f.optional_non_empty("request_id").map(RequestId::from),
            },
            "thread_load_error" => SyncEvent::ThreadLoadError {
                thread_id: f.optional_thread_id(),
                request_id: f.optional_non_empty("request_id").map(RequestId::from),
                error: f
                    .optional_non_empty("error")
                    .unwrap_or_else(|| "unknown error".to_owned()),
            },
            "agent_ready" => SyncEvent::AgentReady {
                agent_name: f.optional_non_empty("agent_name"),
                thread_id: f
                    .optional_non_empty("thread_id")
                    .map(ThreadId::from)
                    .or_else(|| f.optional_thread_id()),
            },
            "ping" => SyncEvent::Ping,
            "message_updated"
            | "context_title_changed"
            | "chat_response"
            | "chat_response_chunk"
            | "chat_response_done"
            | "chat_response_error" => SyncEvent::Ignored {
                event_type: self.event_type.clone(),
            },
            other => SyncEvent::Unknown {
                event_type: other.to_owned(),
            },
        };
        Ok(event)
    }
}

/// Author of a streamed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// A user turn typed inside the agent.
    User,
    /// Assistant output.
    Assistant,
}

impl MessageRole {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A validated `message_added` payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAdded {
    /// Agent thread.
    pub thread_id: ThreadId,
    /// Agent message ID. Repeats of the same ID carry the full message text.
    pub message_id: String,
    /// Message text.
    pub content: String,
    /// Author.
    pub role: MessageRole,
}

/// Typed inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// The agent opened a thread (possibly in response to a platform request).
    ThreadCreated {
        /// Agent thread.
        thread_id: ThreadId,
        /// Thread title, if reported.
        title: Option<String>,
        /// Platform request that caused the thread.
        request_id: Option<RequestId>,
    },
    /// The user opened a thread directly in the agent.
    UserCreatedThread {
        /// Agent thread.
        thread_id: ThreadId,
        /// Thread title, if reported.
        title: Option<String>,
    },
    /// The agent renamed a thread.
    ThreadTitleChanged {
        /// Agent thread.
        thread_id: ThreadId,
        /// New title.
        title: String,
    },
    /// Streamed message content.
    MessageAdded(MessageAdded),
    /// The assistant finished its turn.
    MessageCompleted {
        /// Agent thread.
        thread_id: ThreadId,
        /// Platform request being answered.
        request_id: Option<RequestId>,
    },
    /// The agent could not open a thread.
    ThreadLoadError {
        /// Agent thread, if known.
        thread_id: Option<ThreadId>,
        /// Platform request that failed.
        request_id: Option<RequestId>,
        /// Error text.
        error: String,
    },
    /// The agent finished loading and can receive commands.
    AgentReady {
        /// Agent implementation name.
        agent_name: Option<String>,
        /// Thread the agent resumed, if any.
        thread_id: Option<ThreadId>,
    },
    /// Keepalive at the application layer.
    Ping,
    /// A recognized event type with no effect on synchronization.
    Ignored {
        /// The event type tag.
        event_type: String,
    },
    /// An unrecognized event type.
    Unknown {
        /// The event type tag.
        event_type: String,
    },
}

impl SyncEvent {
    /// Thread the event refers to, when it names one.
    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            Self::ThreadCreated { thread_id, .. }
            | Self::UserCreatedThread { thread_id, .. }
            | Self::ThreadTitleChanged { thread_id, .. }
            | Self::MessageCompleted { thread_id, .. }
            | Self::MessageAdded(MessageAdded { thread_id, .. }) => Some(thread_id),
            Self::ThreadLoadError { thread_id, .. } | Self::AgentReady { thread_id, .. } => {
                thread_id.as_ref()
            }
            Self::Ping | Self::Ignored { .. } | Self::Unknown { .. } => None,
        }
    }
}

struct Fields<'a> {
    event: &'a str,
    data: &'a Map<String, Value>,
}

impl Fields<'_> {
    fn missing(&self, field: &'static str) -> ValidationError {
        ValidationError::MissingField {
            event: self.event.to_owned(),
            field,
        }
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    fn string(&self, field: &'static str) -> Result<String, ValidationError> {
        self.raw(field)
            .map(str::to_owned)
            .ok_or_else(|| self.missing(field))
    }

    fn non_empty(&self, field: &'static str) -> Result<String, ValidationError> {
        self.raw(field)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| self.missing(field))
    }

    fn optional_non_empty(&self, key: &str) -> Option<String> {
        self.raw(key).filter(|s| !s.is_empty()).map(str::to_owned)
    }

    fn optional_thread_id(&self) -> Option<ThreadId> {
        self.optional_non_empty("acp_thread_id")
            .or_else(|| self.optional_non_empty("context_id"))
            .map(ThreadId::from)
    }

    fn thread_id(&self) -> Result<ThreadId, ValidationError> {
        self.optional_thread_id()
            .ok_or_else(|| self.missing("acp_thread_id"))
    }

    fn role(&self) -> Result<MessageRole, ValidationError> {
        let raw = self.raw("role").ok_or_else(|| self.missing("role"))?;
        MessageRole::parse(raw).ok_or_else(|| ValidationError::InvalidField {
            event: self.event.to_owned(),
            field: "role",
            reason: format!("expected user or assistant, got {raw:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn message_added(data: Value) -> Result<SyncEvent, ValidationError> {
        SyncMessage::new("message_added", data).decode()
    }

    #[test]
    fn parse_text_frame() {
        let msg = SyncMessage::parse(
            r#"{"event_type":"thread_created","session_id":"ses_1","data":{"acp_thread_id":"t"}}"#,
        )
        .unwrap();
        assert_eq!(msg.event_type, "thread_created");
        assert_eq!(msg.session_hint(), Some(SessionId::from("ses_1")));
    }

    #[test]
    fn parse_without_data_defaults_to_empty() {
        let msg = SyncMessage::parse(r#"{"event_type":"ping"}"#).unwrap();
        assert!(msg.data.is_empty());
        assert_eq!(msg.decode().unwrap(), SyncEvent::Ping);
    }

    #[test]
    fn parse_rejects_non_message() {
        assert_matches!(SyncMessage::parse("not json"), Err(ValidationError::Malformed(_)));
        assert_matches!(SyncMessage::parse(r#"{"data":{}}"#), Err(ValidationError::Malformed(_)));
    }

    #[test]
    fn empty_session_hint_is_none() {
        let msg = SyncMessage::new("ping", json!({})).with_session("");
        assert!(msg.session_hint().is_none());
    }

    #[test]
    fn thread_created_decodes_optional_fields() {
        let event = SyncMessage::new(
            "thread_created",
            json!({"acp_thread_id": "thread-abc", "title": "Test Thread", "request_id": "req-123"}),
        )
        .decode()
        .unwrap();
        assert_eq!(
            event,
            SyncEvent::ThreadCreated {
                thread_id: ThreadId::from("thread-abc"),
                title: Some("Test Thread".into()),
                request_id: Some(RequestId::from("req-123")),
            }
        );
    }

    #[test]
    fn context_created_is_thread_created_with_context_id() {
        let event = SyncMessage::new("context_created", json!({"context_id": "ctx-1"}))
            .decode()
            .unwrap();
        assert_matches!(event, SyncEvent::ThreadCreated { thread_id, title: None, request_id: None } => {
            assert_eq!(thread_id.as_str(), "ctx-1");
        });
    }

    #[test]
    fn thread_created_requires_thread_id() {
        let err = SyncMessage::new("thread_created", json!({"title": "x"}))
            .decode()
            .unwrap_err();
        assert_eq!(err.field(), Some("acp_thread_id"));
    }

    #[test]
    fn message_added_requires_each_field() {
        let full = json!({
            "acp_thread_id": "t",
            "message_id": "m",
            "content": "c",
            "role": "assistant",
        });
        for field in ["acp_thread_id", "message_id", "content", "role"] {
            let mut data = full.clone();
            let _ = data.as_object_mut().unwrap().remove(field);
            let err = message_added(data).unwrap_err();
            assert_eq!(err.field(), Some(field), "removing {field}");
            assert!(err.to_string().contains(field));
        }
    }

    #[test]
    fn message_added_rejects_non_string_content() {
        let err = message_added(json!({
            "acp_thread_id": "t", "message_id": "m", "content": 42, "role": "user",
        }))
        .unwrap_err();
        assert_eq!(err.field(), Some("content"));
    }

    #[test]
    fn message_added_allows_empty_content() {
        let event = message_added(json!({
            "acp_thread_id": "t", "message_id": "m", "content": "", "role": "assistant",
        }))
        .unwrap();
        assert_matches!(event, SyncEvent::MessageAdded(MessageAdded { content, .. }) if content.is_empty());
    }

    #[test]
    fn message_added_rejects_unknown_role() {
        let err = message_added(json!({
            "acp_thread_id": "t", "message_id": "m", "content": "c", "role": "system",
        }))
        .unwrap_err();
        assert_matches!(err, ValidationError::InvalidField { field: "role", .. });
    }

    #[test]
    fn message_completed_rejects_empty_thread() {
        let err = SyncMessage::new("message_completed", json!({"acp_thread_id": ""}))
            .decode()
            .unwrap_err();
        assert_eq!(err.field(), Some("acp_thread_id"));
    }

    #[test]
    fn title_changed_requires_title() {
        let err = SyncMessage::new("thread_title_changed", json!({"acp_thread_id": "t"}))
            .decode()
            .unwrap_err();
        assert_eq!(err.field(), Some("title"));
    }

    #[test]
    fn thread_load_error_defaults_message() {
        let event = SyncMessage::new("thread_load_error", json!({})).decode().unwrap();
        assert_eq!(
            event,
            SyncEvent::ThreadLoadError {
                thread_id: None,
                request_id: None,
                error: "unknown error".into(),
            }
        );
    }

    #[test]
    fn legacy_and_unknown_events_decode() {
        assert_matches!(
            SyncMessage::new("chat_response_chunk", json!({})).decode(),
            Ok(SyncEvent::Ignored { .. })
        );
        assert_matches!(
            SyncMessage::new("brand_new", json!({})).decode(),
            Ok(SyncEvent::Unknown { event_type }) if event_type == "brand_new"
        );
    }

    #[test]
    fn thread_id_accessor() {
        let event = SyncMessage::new("agent_ready", json!({"thread_id": "t-7"}))
            .decode()
            .unwrap();
        assert_eq!(event.thread_id().map(ThreadId::as_str), Some("t-7"));
        assert!(SyncEvent::Ping.thread_id().is_none());
    }
}
