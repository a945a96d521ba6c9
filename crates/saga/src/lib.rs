//! Order-fulfillment saga.
//!
//! A checkout moves through these steps:
//! 1. Validate the cart and open the order in `PendingPayment`
//! 2. Reserve stock
//! 3. Authorize the payment, at most once per order
//! 4. Confirm the order and commit stock, or fail it and release stock
//!
//! Billing and user notifications react to the resulting events. Every
//! consumer dedupes through the idempotency store, and messages that cannot
//! be processed end up on a dead-letter topic instead of being lost.

pub mod authorizer;
pub mod config;
pub mod controller;
pub mod dead_letter;
pub mod error;
pub mod invoice;
pub mod notification;
pub mod outbox;
pub mod retry;
pub mod runtime;
pub mod services;
pub mod stores;
pub mod topics;

pub use authorizer::{AuthorizationOutcome, AuthorizationRequest, PaymentAuthorizer};
pub use config::SagaConfig;
pub use controller::{CheckoutRequest, Finalization, OrderSagaController, RecoveryReport};
pub use dead_letter::{
    ConsumerWorker, DeadLetterRecord, DeadLetterRouter, Disposition, MessageHandler, dead_letters,
};
pub use error::{CheckoutError, FailureClass, Result, SagaError};
pub use invoice::InvoiceGenerator;
pub use notification::{Notification, NotificationHub, NotificationTransport, Subscription};
pub use outbox::{Outbox, Publication};
pub use retry::BackoffPolicy;
pub use runtime::{Collaborators, Saga};
pub use services::{
    ChargeRequest, ChargeResult, InMemoryPaymentGateway, InMemoryStockService, PaymentGateway,
    ReservationResult, StockService,
};
pub use stores::{
    InMemoryInvoiceRepository, InMemoryOrderRepository, InMemoryPaymentLedger,
    InvoiceRepository, OrderRepository, PaymentLedger,
};
