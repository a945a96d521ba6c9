//! Domain layer for the order-fulfillment saga.
//!
//! This crate provides:
//! - the Aggregate and DomainEvent traits
//! - the Order aggregate with its state machine and checkout validation
//! - the public SagaEvent variants and their log record encoding
//! - invoices and payment attempts

pub mod aggregate;
pub mod error;
pub mod invoice;
pub mod order;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use common::{EventId, InvoiceId, OrderId, PaymentAttemptId, UserId};
pub use error::DomainError;
pub use invoice::{Invoice, InvoiceStatus};
pub use order::{
    CartSnapshot, CheckoutRequestedData, FailureKind, InvoiceCreatedData, LineItem, Money, Order,
    OrderCancelledData, OrderConfirmedData, OrderError, OrderFailedData, OrderState,
    PaymentAuthorizedData, PaymentDeclinedData, PaymentInstrument, PaymentMethod, ProductId,
    SagaEvent, ShippingAddress,
};
pub use payment::{PaymentAttempt, PaymentAttemptOutcome};
