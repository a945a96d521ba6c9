use thiserror::Error;

use crate::Offset;

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The log could not be reached. Callers may retry.
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// An ack or nack referred to a message that is not in flight for the group.
    #[error("No in-flight delivery at {topic}[{partition}]@{offset} for group {group}")]
    UnknownDelivery {
        topic: String,
        group: String,
        partition: u32,
        offset: Offset,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventLogError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EventLogError::Unavailable(_))
    }
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
