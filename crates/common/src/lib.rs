//! Shared identifier types for the order-fulfillment saga.

pub mod types;

pub use types::{EventId, InvoiceId, OrderId, PaymentAttemptId, UserId};
