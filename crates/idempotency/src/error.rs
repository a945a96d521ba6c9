use thiserror::Error;

/// Errors that can occur when interacting with the idempotency store.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The store could not be reached. Callers may retry.
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller tried to complete, publish or release a claim that is not
    /// in the expected state.
    #[error("No {expected} claim held for {consumer}/{key}")]
    ClaimNotHeld {
        consumer: String,
        key: String,
        expected: &'static str,
    },

    /// A stored row carried a status this version does not know.
    #[error("Unknown claim status: {0}")]
    UnknownStatus(String),
}

impl IdempotencyError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Unavailable(_) => true,
            IdempotencyError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    pub(crate) fn not_held(consumer: &str, key: &str, expected: &'static str) -> Self {
        IdempotencyError::ClaimNotHeld {
            consumer: consumer.to_string(),
            key: key.to_string(),
            expected,
        }
    }
}

/// Result type for idempotency store operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;
