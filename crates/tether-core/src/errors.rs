//! Error types shared across crates.
//!
//! - [`ValidationError`]: an inbound event is missing a required field or
//!   carries a malformed one. Never retried.
//! - [`DeliveryError`]: an outbound command could not be queued for an agent.

use thiserror::Error;

/// An inbound sync event failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is absent, null, or not a string.
    #[error("missing or invalid {field} in {event} event")]
    MissingField {
        /// Event type being decoded.
        event: String,
        /// Field name (as it appears on the wire).
        field: &'static str,
    },
    /// A field is present but its value is not acceptable.
    #[error("invalid {field} in {event} event: {reason}")]
    InvalidField {
        /// Event type being decoded.
        event: String,
        /// Field name.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// The frame is not a sync message at all.
    #[error("malformed sync message: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Name of the offending field, when there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField { field, .. } | Self::InvalidField { field, .. } => Some(field),
            Self::Malformed(_) => None,
        }
    }
}

/// An outbound command could not be handed to an agent connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// No live connection is registered for the target.
    #[error("no WebSocket connection found for session {0}")]
    NoConnection(String),
    /// The connection's bounded outbound queue is full.
    #[error("external agent send queue full for session {0}")]
    QueueFull(String),
    /// The command could not be encoded.
    #[error("failed to encode command: {0}")]
    Encode(String),
}

impl DeliveryError {
    /// Whether a later attempt might succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_display() {
        let err = ValidationError::MissingField {
            event: "message_added".into(),
            field: "message_id",
        };
        assert_eq!(
            err.to_string(),
            "missing or invalid message_id in message_added event"
        );
        assert_eq!(err.field(), Some("message_id"));
    }

    #[test]
    fn invalid_field_display() {
        let err = ValidationError::InvalidField {
            event: "message_added".into(),
            field: "role",
            reason: "expected user or assistant, got system".into(),
        };
        assert!(err.to_string().contains("invalid role"));
    }

    #[test]
    fn delivery_error_display() {
        assert_eq!(
            DeliveryError::NoConnection("ses_1".into()).to_string(),
            "no WebSocket connection found for session ses_1"
        );
        assert!(DeliveryError::QueueFull("ses_1".into()).is_transient());
        assert!(!DeliveryError::NoConnection("ses_1".into()).is_transient());
    }
}
