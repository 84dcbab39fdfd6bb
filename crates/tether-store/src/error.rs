/// Durable store failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),

    /// No record with the given key.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind.
        entity: &'static str,
        /// Lookup key.
        id: String,
    },

    /// The write violates a store invariant.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Build a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the error is a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StoreError::not_found("session", "ses_1");
        assert_eq!(err.to_string(), "session not found: ses_1");
        assert!(err.is_not_found());
        assert!(!StoreError::Conflict("x".into()).is_not_found());
    }
}
