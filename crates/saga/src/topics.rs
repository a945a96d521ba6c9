//! Topic and consumer names.

use domain::SagaEvent;

/// Checkout requests and the order's own state transitions.
pub const ORDERS: &str = "orders";

/// Payment authorization outcomes.
pub const PAYMENTS: &str = "payments";

/// Invoices produced by billing.
pub const INVOICES: &str = "invoices";

/// Idempotency scope of the payment authorizer.
pub const PAYMENT_AUTHORIZER: &str = "payment-authorizer";

/// Consumer group and idempotency scope of the order saga controller.
pub const ORDER_SAGA: &str = "order-saga";

/// Consumer group and idempotency scope of the invoice generator.
pub const INVOICE_GENERATOR: &str = "invoice-generator";

/// Returns the topic an event is published to.
pub fn topic_for(event: &SagaEvent) -> &'static str {
    match event {
        SagaEvent::CheckoutRequested(_)
        | SagaEvent::OrderConfirmed(_)
        | SagaEvent::OrderFailed(_)
        | SagaEvent::OrderCancelled(_) => ORDERS,
        SagaEvent::PaymentAuthorized(_) | SagaEvent::PaymentDeclined(_) => PAYMENTS,
        SagaEvent::InvoiceCreated(_) => INVOICES,
    }
}
