//! Branded ID newtypes.
//!
//! Platform-owned entities get a prefixed, time-ordered ID (`ses_<uuid v7>`).
//! Identifiers minted by the external agent (threads, connections) are opaque
//! strings wrapped without a generator.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the wrapped value is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
    ($(#[$meta:meta])* $name:ident, prefix = $prefix:literal) => {
        branded_id!($(#[$meta])* $name);

        impl $name {
            /// ID prefix for this entity type.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new prefixed ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Whether a raw string carries this type's prefix.
            #[must_use]
            pub fn has_prefix(raw: &str) -> bool {
                raw.strip_prefix($prefix).is_some_and(|rest| rest.starts_with('_'))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Platform session identifier.
    SessionId, prefix = "ses"
}

branded_id! {
    /// A single turn (prompt + response) within a session.
    InteractionId, prefix = "int"
}

branded_id! {
    /// Correlates a platform-initiated request with the agent's reply.
    RequestId, prefix = "req"
}

branded_id! {
    /// Durably queued prompt entry.
    PromptId, prefix = "prm"
}

branded_id! {
    /// Design review comment.
    CommentId, prefix = "cmt"
}

branded_id! {
    /// Design review document.
    ReviewId, prefix = "rev"
}

branded_id! {
    /// Unit of work that owns a planning session.
    TaskId, prefix = "tsk"
}

branded_id! {
    /// The external agent's conversation identifier.
    ThreadId
}

branded_id! {
    /// Identifier of an agent connection, as presented on connect.
    AgentId
}

impl AgentId {
    /// Fallback ID for connections that present none.
    #[must_use]
    pub fn generated() -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        Self(format!("external-agent-{nanos}"))
    }

    /// The platform session this connection speaks for, when the agent
    /// connected with a session ID directly.
    #[must_use]
    pub fn as_session_id(&self) -> Option<SessionId> {
        SessionId::has_prefix(&self.0).then(|| SessionId::from_string(self.0.clone()))
    }
}

impl From<&SessionId> for AgentId {
    fn from(id: &SessionId) -> Self {
        Self(id.as_str().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_prefixed_uuid_v7() {
        let id = SessionId::new();
        let raw = id.as_str().strip_prefix("ses_").expect("prefix");
        let parsed = Uuid::parse_str(raw).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        let a = InteractionId::new();
        let b = InteractionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let first = PromptId::new();
        let second = PromptId::new();
        assert!(first < second);
    }

    #[test]
    fn has_prefix_requires_separator() {
        assert!(SessionId::has_prefix("ses_123"));
        assert!(!SessionId::has_prefix("session_123"));
        assert!(!SessionId::has_prefix("ses"));
        assert!(!SessionId::has_prefix("req_123"));
    }

    #[test]
    fn serde_is_transparent() {
        let id = RequestId::from("req_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"req_abc\"");
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn agent_id_resolves_to_session() {
        let agent = AgentId::from("ses_existing");
        assert_eq!(agent.as_session_id(), Some(SessionId::from("ses_existing")));
        assert!(AgentId::from("req_123").as_session_id().is_none());
    }

    #[test]
    fn generated_agent_id_has_stable_prefix() {
        let id = AgentId::generated();
        assert!(id.starts_with("external-agent-"));
        assert!(id.as_session_id().is_none());
    }

    #[test]
    fn thread_id_display_and_deref() {
        let id = ThreadId::from("thread-abc");
        assert_eq!(id.to_string(), "thread-abc");
        assert_eq!(id.len(), 10);
        assert!(!id.is_empty());
    }
}
