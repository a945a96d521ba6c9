//! Saga error types.

use common::OrderId;
use domain::{DomainError, OrderError};
use event_log::EventLogError;
use idempotency::IdempotencyError;
use thiserror::Error;

/// How the dead-letter router treats a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Redeliver after backoff.
    Transient,

    /// Retrying cannot help; dead-letter immediately.
    Permanent,
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Input rejected by a business rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A collaborator timed out or could not be reached.
    #[error("Transient infrastructure failure: {0}")]
    TransientInfra(String),

    /// A definitive business refusal, such as a declined payment.
    #[error("Declined: {0}")]
    BusinessDecline(String),

    /// The message was already processed by this consumer.
    #[error("Already processed by {consumer}: {key}")]
    DuplicateProcessing { consumer: String, key: String },

    /// The message cannot be decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Another caller holds the claim and has not finished yet.
    #[error("Processing of {key} by {consumer} is in progress elsewhere")]
    InProgress { consumer: String, key: String },

    /// An event referred to an order this process has not seen yet.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("Idempotency store error: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Classifies the error for the dead-letter router.
    pub fn class(&self) -> FailureClass {
        let transient = match self {
            SagaError::TransientInfra(_)
            | SagaError::InProgress { .. }
            | SagaError::OrderNotFound(_) => true,
            SagaError::EventLog(e) => e.is_transient(),
            SagaError::Idempotency(e) => e.is_transient(),
            SagaError::Validation(_)
            | SagaError::BusinessDecline(_)
            | SagaError::DuplicateProcessing { .. }
            | SagaError::Malformed(_)
            | SagaError::Domain(_)
            | SagaError::Order(_)
            | SagaError::Serialization(_) => false,
        };

        if transient {
            FailureClass::Transient
        } else {
            FailureClass::Permanent
        }
    }

    /// Returns true if retrying may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Returns true if the message was already processed.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SagaError::DuplicateProcessing { .. })
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::Validation(_) => "validation",
            SagaError::TransientInfra(_) => "transient_infra",
            SagaError::BusinessDecline(_) => "business_decline",
            SagaError::DuplicateProcessing { .. } => "duplicate",
            SagaError::Malformed(_) => "malformed",
            SagaError::InProgress { .. } => "in_progress",
            SagaError::OrderNotFound(_) => "order_not_found",
            SagaError::Domain(_) => "domain",
            SagaError::Order(_) => "order",
            SagaError::EventLog(_) => "event_log",
            SagaError::Idempotency(_) => "idempotency",
            SagaError::Serialization(_) => "serialization",
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Caller-facing outcome of a failed checkout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    /// The request was rejected before an order was allocated.
    #[error("Invalid checkout: {0}")]
    Validation(String),

    /// Stock could not be reserved; the order failed.
    #[error("Out of stock: {0}")]
    OutOfStock(String),

    /// The payment was declined; the order failed.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Authorization kept failing transiently.
    #[error("Payment authorizer unavailable: {0}")]
    AuthorizerUnavailable(String),

    /// Unexpected infrastructure failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutError::Validation(_) => "validation",
            CheckoutError::OutOfStock(_) => "out_of_stock",
            CheckoutError::PaymentDeclined(_) => "payment_declined",
            CheckoutError::AuthorizerUnavailable(_) => "authorizer_unavailable",
            CheckoutError::Internal(_) => "internal",
        }
    }
}

impl From<SagaError> for CheckoutError {
    fn from(error: SagaError) -> Self {
        match error {
            SagaError::Validation(msg) => CheckoutError::Validation(msg),
            SagaError::Order(e) if e.is_validation() => CheckoutError::Validation(e.to_string()),
            SagaError::BusinessDecline(reason) => CheckoutError::PaymentDeclined(reason),
            other => CheckoutError::Internal(other.to_string()),
        }
    }
}
