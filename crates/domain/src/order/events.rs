//! Public saga events.
//!
//! Every variant carries the order id (the partition key) and the owning user
//! id, so any consumer can route or notify without looking the order up.

use chrono::{DateTime, Utc};
use common::{EventId, InvoiceId, OrderId, PaymentAttemptId, UserId};
use event_log::LogRecord;
use serde::{Deserialize, Serialize};

use crate::{DomainError, aggregate::DomainEvent};

use super::{LineItem, Money, PaymentInstrument, PaymentMethod, ShippingAddress};

/// Events that drive an order through the fulfillment saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// A cart was checked out and an order allocated.
    CheckoutRequested(CheckoutRequestedData),

    /// The payment authorizer reserved funds.
    PaymentAuthorized(PaymentAuthorizedData),

    /// The payment authorizer got a definitive decline.
    PaymentDeclined(PaymentDeclinedData),

    /// The order was confirmed; items and total are frozen.
    OrderConfirmed(OrderConfirmedData),

    /// The order failed and its stock was released.
    OrderFailed(OrderFailedData),

    /// A confirmed order was cancelled by an administrative compensation.
    OrderCancelled(OrderCancelledData),

    /// Billing produced the order's invoice.
    InvoiceCreated(InvoiceCreatedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::CheckoutRequested(_) => "CheckoutRequested",
            SagaEvent::PaymentAuthorized(_) => "PaymentAuthorized",
            SagaEvent::PaymentDeclined(_) => "PaymentDeclined",
            SagaEvent::OrderConfirmed(_) => "OrderConfirmed",
            SagaEvent::OrderFailed(_) => "OrderFailed",
            SagaEvent::OrderCancelled(_) => "OrderCancelled",
            SagaEvent::InvoiceCreated(_) => "InvoiceCreated",
        }
    }
}

/// Data for CheckoutRequested event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequestedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub total: Money,
    pub instrument: PaymentInstrument,
    pub shipping_address: ShippingAddress,
    pub requested_at: DateTime<Utc>,
}

/// Data for PaymentAuthorized event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAuthorizedData {
    pub order_id: OrderId,
    pub user_id: UserId,

    /// The attempt that was authorized.
    pub attempt_id: PaymentAttemptId,

    pub amount: Money,

    /// Gateway transaction reference.
    pub transaction_ref: String,

    pub authorized_at: DateTime<Utc>,
}

/// Data for PaymentDeclined event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDeclinedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub attempt_id: PaymentAttemptId,
    pub amount: Money,

    /// Reason given by the gateway.
    pub reason: String,

    pub declined_at: DateTime<Utc>,
}

/// Data for OrderConfirmed event.
///
/// Carries the frozen line items and total so billing never has to read the
/// order record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub total: Money,
    pub transaction_ref: String,
    pub payment_method: PaymentMethod,
    pub confirmed_at: DateTime<Utc>,
}

/// Why an order failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The gateway declined the payment.
    PaymentDeclined,

    /// Authorization kept failing transiently until retries ran out.
    AuthorizerUnavailable,

    /// Stock could not be reserved.
    OutOfStock,
}

impl FailureKind {
    /// Returns the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PaymentDeclined => "payment_declined",
            FailureKind::AuthorizerUnavailable => "authorizer_unavailable",
            FailureKind::OutOfStock => "out_of_stock",
        }
    }
}

/// Data for OrderFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFailedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub kind: FailureKind,

    /// Human-readable failure reason.
    pub reason: String,

    pub failed_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: OrderId,
    pub user_id: UserId,

    /// Reason for cancellation.
    pub reason: String,

    pub cancelled_at: DateTime<Utc>,
}

/// Data for InvoiceCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceCreatedData {
    pub invoice_id: InvoiceId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub transaction_ref: String,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
}

impl SagaEvent {
    /// Returns the order this event concerns.
    pub fn order_id(&self) -> OrderId {
        match self {
            SagaEvent::CheckoutRequested(d) => d.order_id,
            SagaEvent::PaymentAuthorized(d) => d.order_id,
            SagaEvent::PaymentDeclined(d) => d.order_id,
            SagaEvent::OrderConfirmed(d) => d.order_id,
            SagaEvent::OrderFailed(d) => d.order_id,
            SagaEvent::OrderCancelled(d) => d.order_id,
            SagaEvent::InvoiceCreated(d) => d.order_id,
        }
    }

    /// Returns the user who owns the order.
    pub fn user_id(&self) -> UserId {
        match self {
            SagaEvent::CheckoutRequested(d) => d.user_id,
            SagaEvent::PaymentAuthorized(d) => d.user_id,
            SagaEvent::PaymentDeclined(d) => d.user_id,
            SagaEvent::OrderConfirmed(d) => d.user_id,
            SagaEvent::OrderFailed(d) => d.user_id,
            SagaEvent::OrderCancelled(d) => d.user_id,
            SagaEvent::InvoiceCreated(d) => d.user_id,
        }
    }

    /// Wraps the event in a log record.
    pub fn to_record(
        &self,
        event_id: EventId,
        causation_id: Option<EventId>,
    ) -> Result<LogRecord, DomainError> {
        Ok(LogRecord::builder()
            .event_id(event_id)
            .order_id(self.order_id())
            .event_type(self.event_type())
            .causation_id(causation_id)
            .payload(self)?
            .build())
    }

    /// Decodes the event carried by a log record.
    ///
    /// Fails if the payload does not decode or disagrees with the record's
    /// declared type or key.
    pub fn from_record(record: &LogRecord) -> Result<Self, DomainError> {
        let event: SagaEvent = record.decode()?;

        if event.event_type() != record.event_type {
            return Err(DomainError::EventTypeMismatch {
                declared: record.event_type.clone(),
                actual: event.event_type(),
            });
        }
        if event.order_id() != record.order_id {
            return Err(DomainError::PartitionKeyMismatch {
                key: record.order_id,
                payload: event.order_id(),
            });
        }

        Ok(event)
    }
}

// Convenience constructors for events
impl SagaEvent {
    /// Creates an OrderFailed event.
    pub fn order_failed(
        order_id: OrderId,
        user_id: UserId,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Self {
        SagaEvent::OrderFailed(OrderFailedData {
            order_id,
            user_id,
            kind,
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    /// Creates an OrderCancelled event.
    pub fn order_cancelled(order_id: OrderId, user_id: UserId, reason: impl Into<String>) -> Self {
        SagaEvent::OrderCancelled(OrderCancelledData {
            order_id,
            user_id,
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }
}
