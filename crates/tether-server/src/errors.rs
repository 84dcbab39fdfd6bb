//! Engine error type.
//!
//! Every failure is classified by [`SyncError::kind`]:
//!
//! - `validation`: the event payload is unusable. Never retried.
//! - `resolution`: a durable lookup, create or update failed while resolving
//!   the target. Mapping state is left as it was.
//! - `delivery`: an outbound command could not be queued.
//! - `transport`: the socket failed. Ends only the owning connection.

use std::fmt;

use tether_core::{DeliveryError, ValidationError};
use tether_store::StoreError;
use thiserror::Error;

/// Error returned by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The event failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A durable-store call failed.
    #[error("store {op} failed: {source}")]
    Store {
        /// Store operation name.
        op: &'static str,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// No session mirrors the thread, even after the durable scan.
    #[error("no session found for thread {0}")]
    SessionNotFound(String),
    /// No review comment matches the given key.
    #[error("no design review comment found for {0}")]
    CommentNotFound(String),
    /// A record exists but lacks what the operation needs.
    #[error("{0}")]
    InvalidState(String),
    /// An outbound command could not be queued.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    /// The socket failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Coarse error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unusable event payload.
    Validation,
    /// Durable lookup or mutation failed.
    Resolution,
    /// Outbound command not queued.
    Delivery,
    /// Socket failure.
    Transport,
}

impl ErrorKind {
    /// Stable lowercase name, as used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Resolution => "resolution",
            Self::Delivery => "delivery",
            Self::Transport => "transport",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store { .. }
            | Self::SessionNotFound(_)
            | Self::CommentNotFound(_)
            | Self::InvalidState(_) => ErrorKind::Resolution,
            Self::Delivery(_) => ErrorKind::Delivery,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Attach the failing operation name to a store result.
pub(crate) trait StoreContext<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, StoreError> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| SyncError::Store { op, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        let validation: SyncError = ValidationError::Malformed("x".into()).into();
        assert_eq!(validation.kind(), ErrorKind::Validation);

        let store: Result<()> = Err(StoreError::Database("down".into())).op("get_session");
        let store = store.unwrap_err();
        assert_eq!(store.kind(), ErrorKind::Resolution);
        assert_eq!(store.to_string(), "store get_session failed: database error: down");

        let delivery: SyncError = DeliveryError::QueueFull("ses_1".into()).into();
        assert_eq!(delivery.kind(), ErrorKind::Delivery);
        assert_eq!(SyncError::Transport("reset".into()).kind().as_str(), "transport");
    }

    #[test]
    fn session_not_found_is_resolution() {
        let err = SyncError::SessionNotFound("thread-9".into());
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert_eq!(err.to_string(), "no session found for thread thread-9");
    }
}
