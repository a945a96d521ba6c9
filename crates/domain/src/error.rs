//! Domain error types.

use common::OrderId;
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An order rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A record declared one event type but carried another.
    #[error("Record declares {declared} but carries {actual}")]
    EventTypeMismatch {
        declared: String,
        actual: &'static str,
    },

    /// A record's partition key differs from the order id in its payload.
    #[error("Record keyed by order {key} carries an event for order {payload}")]
    PartitionKeyMismatch { key: OrderId, payload: OrderId },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
