//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{InvoiceId, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    CartSnapshot, FailureKind, LineItem, Money, OrderError, OrderState, PaymentInstrument,
    SagaEvent, ShippingAddress,
    events::{CheckoutRequestedData, OrderConfirmedData},
};

/// Order aggregate root.
///
/// Owned by the saga controller. Built from a `CheckoutRequested` event and
/// moved through the state machine by the saga's terminal events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Option<OrderId>,
    user_id: Option<UserId>,
    items: Vec<LineItem>,
    total: Money,
    shipping_address: Option<ShippingAddress>,
    instrument: Option<PaymentInstrument>,
    state: OrderState,

    /// Gateway transaction reference once confirmed.
    transaction_ref: Option<String>,

    /// Failure kind and reason once failed.
    failure: Option<(FailureKind, String)>,

    cancellation_reason: Option<String>,
    invoice_id: Option<InvoiceId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = SagaEvent;

    fn id(&self) -> Option<OrderId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SagaEvent::CheckoutRequested(data) => self.apply_checkout_requested(data),
            SagaEvent::OrderConfirmed(data) => {
                if self.state.can_confirm() {
                    self.state = OrderState::Confirmed;
                    self.transaction_ref = Some(data.transaction_ref);
                    self.updated_at = Some(data.confirmed_at);
                }
            }
            SagaEvent::OrderFailed(data) => {
                if self.state.can_fail() {
                    self.state = OrderState::Failed;
                    self.failure = Some((data.kind, data.reason));
                    self.updated_at = Some(data.failed_at);
                }
            }
            SagaEvent::OrderCancelled(data) => {
                if self.state.can_cancel() {
                    self.state = OrderState::Cancelled;
                    self.cancellation_reason = Some(data.reason);
                    self.updated_at = Some(data.cancelled_at);
                }
            }
            SagaEvent::InvoiceCreated(data) => {
                self.invoice_id.get_or_insert(data.invoice_id);
            }
            // Payment outcomes are decided on by the controller, which then
            // emits the order's own terminal event.
            SagaEvent::PaymentAuthorized(_) | SagaEvent::PaymentDeclined(_) => {}
        }
    }
}

// Query methods
impl Order {
    /// Returns the owning user.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// Returns the current state.
    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Returns the line items, in cart order.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Returns the total amount.
    pub fn total(&self) -> Money {
        self.total
    }

    pub fn shipping_address(&self) -> Option<&ShippingAddress> {
        self.shipping_address.as_ref()
    }

    pub fn instrument(&self) -> Option<&PaymentInstrument> {
        self.instrument.as_ref()
    }

    /// Returns the transaction reference of the authorized payment.
    pub fn transaction_ref(&self) -> Option<&str> {
        self.transaction_ref.as_deref()
    }

    /// Returns why the order failed, if it did.
    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        self.failure
            .as_ref()
            .map(|(kind, reason)| (*kind, reason.as_str()))
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// Returns the invoice billed for this order, once known.
    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Returns when the order last changed state.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

// Command methods (return events)
impl Order {
    /// Validates a checkout and returns the event that opens the order.
    pub fn checkout(
        order_id: OrderId,
        user_id: UserId,
        cart: CartSnapshot,
        instrument: PaymentInstrument,
        shipping_address: ShippingAddress,
    ) -> Result<SagaEvent, OrderError> {
        cart.validate()?;
        instrument.validate()?;
        shipping_address.validate()?;

        let total = cart.total()?;
        Ok(SagaEvent::CheckoutRequested(CheckoutRequestedData {
            order_id,
            user_id,
            items: cart.into_items(),
            total,
            instrument,
            shipping_address,
            requested_at: Utc::now(),
        }))
    }

    /// Confirms the order after its payment was authorized.
    pub fn confirm(&self, transaction_ref: impl Into<String>) -> Result<SagaEvent, OrderError> {
        let (order_id, user_id) = self.identity()?;
        if !self.state.can_confirm() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "confirm",
            });
        }
        let payment_method = self
            .instrument
            .as_ref()
            .map(|instrument| instrument.method)
            .ok_or(OrderError::NotCreated)?;

        Ok(SagaEvent::OrderConfirmed(OrderConfirmedData {
            order_id,
            user_id,
            items: self.items.clone(),
            total: self.total,
            transaction_ref: transaction_ref.into(),
            payment_method,
            confirmed_at: Utc::now(),
        }))
    }

    /// Fails the order.
    pub fn fail(
        &self,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Result<SagaEvent, OrderError> {
        let (order_id, user_id) = self.identity()?;
        if !self.state.can_fail() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "fail",
            });
        }

        Ok(SagaEvent::order_failed(order_id, user_id, kind, reason))
    }

    /// Cancels a confirmed order.
    pub fn cancel(&self, reason: impl Into<String>) -> Result<SagaEvent, OrderError> {
        let (order_id, user_id) = self.identity()?;
        if !self.state.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "cancel",
            });
        }

        Ok(SagaEvent::order_cancelled(order_id, user_id, reason))
    }

    fn identity(&self) -> Result<(OrderId, UserId), OrderError> {
        match (self.id, self.user_id) {
            (Some(order_id), Some(user_id)) => Ok((order_id, user_id)),
            _ => Err(OrderError::NotCreated),
        }
    }
}

// Apply event helpers
impl Order {
    fn apply_checkout_requested(&mut self, data: CheckoutRequestedData) {
        if self.id.is_some() {
            return;
        }

        self.id = Some(data.order_id);
        self.user_id = Some(data.user_id);
        self.items = data.items;
        self.total = data.total;
        self.shipping_address = Some(data.shipping_address);
        self.instrument = Some(data.instrument);
        self.state = OrderState::PendingPayment;
        self.created_at = Some(data.requested_at);
        self.updated_at = Some(data.requested_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;

    fn address() -> ShippingAddress {
        ShippingAddress {
            street: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            zip_code: "62701".to_string(),
            country: "US".to_string(),
        }
    }

    fn cart() -> CartSnapshot {
        CartSnapshot::new(vec![
            LineItem::new("SKU-001", "Widget", 2, Money::from_cents(1999)),
            LineItem::new("SKU-002", "Gadget", 1, Money::from_cents(2000)),
        ])
    }

    fn create_order() -> (Order, OrderId) {
        let order_id = OrderId::new();
        let event = Order::checkout(
            order_id,
            UserId::new(),
            cart(),
            PaymentInstrument::card("tok_visa", "4242"),
            address(),
        )
        .unwrap();
        (Order::from_events([event]), order_id)
    }

    #[test]
    fn test_checkout_opens_pending_order() {
        let (order, order_id) = create_order();
        assert_eq!(order.id(), Some(order_id));
        assert_eq!(order.state(), OrderState::PendingPayment);
        assert_eq!(order.total(), Money::from_cents(5998));
        assert_eq!(order.items().len(), 2);
    }

    #[test]
    fn test_checkout_validates_cart() {
        let result = Order::checkout(
            OrderId::new(),
            UserId::new(),
            CartSnapshot::default(),
            PaymentInstrument::card("tok_visa", "4242"),
            address(),
        );
        assert!(matches!(result, Err(OrderError::EmptyCart)));
    }

    #[test]
    fn test_confirm() {
        let (mut order, _) = create_order();
        let event = order.confirm("txn-1").unwrap();
        assert_eq!(event.event_type(), "OrderConfirmed");

        order.apply(event);
        assert_eq!(order.state(), OrderState::Confirmed);
        assert_eq!(order.transaction_ref(), Some("txn-1"));
    }

    #[test]
    fn test_confirmed_event_carries_frozen_snapshot() {
        let (order, _) = create_order();
        let SagaEvent::OrderConfirmed(data) = order.confirm("txn-1").unwrap() else {
            panic!("expected OrderConfirmed");
        };
        assert_eq!(data.total, order.total());
        assert_eq!(data.items, order.items());
        assert_eq!(data.payment_method, crate::order::PaymentMethod::CreditCard);
    }

    #[test]
    fn test_fail() {
        let (mut order, _) = create_order();
        order.apply(order.fail(FailureKind::PaymentDeclined, "insufficient funds").unwrap());

        assert_eq!(order.state(), OrderState::Failed);
        assert_eq!(
            order.failure(),
            Some((FailureKind::PaymentDeclined, "insufficient funds"))
        );
    }

    #[test]
    fn test_cannot_confirm_failed_order() {
        let (mut order, _) = create_order();
        order.apply(order.fail(FailureKind::AuthorizerUnavailable, "timeout").unwrap());

        assert!(matches!(
            order.confirm("txn-1"),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_late_events_do_not_move_settled_order() {
        let (mut order, _) = create_order();
        let confirmed = order.confirm("txn-1").unwrap();
        let failed = order.fail(FailureKind::PaymentDeclined, "declined").unwrap();

        order.apply(confirmed.clone());
        order.apply(failed);
        order.apply(confirmed);

        assert_eq!(order.state(), OrderState::Confirmed);
        assert!(order.failure().is_none());
    }

    #[test]
    fn test_duplicate_checkout_event_is_ignored() {
        let (mut order, order_id) = create_order();
        order.apply(order.confirm("txn-1").unwrap());

        let replayed = Order::checkout(
            order_id,
            UserId::new(),
            cart(),
            PaymentInstrument::card("tok_visa", "4242"),
            address(),
        )
        .unwrap();
        order.apply(replayed);

        assert_eq!(order.state(), OrderState::Confirmed);
    }

    #[test]
    fn test_cancel_only_after_confirmation() {
        let (mut order, _) = create_order();
        assert!(order.cancel("fraud review").is_err());

        order.apply(order.confirm("txn-1").unwrap());
        order.apply(order.cancel("fraud review").unwrap());

        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.total(), Money::from_cents(5998));
        assert_eq!(order.cancellation_reason(), Some("fraud review"));
    }

    #[test]
    fn test_commands_on_uncreated_order_fail() {
        let order = Order::default();
        assert!(matches!(order.confirm("txn"), Err(OrderError::NotCreated)));
    }

    #[test]
    fn test_serialization() {
        let (mut order, order_id) = create_order();
        order.apply(order.confirm("txn-1").unwrap());

        let json = serde_json::to_string(&order).unwrap();
        let deserialized: Order = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id(), Some(order_id));
        assert_eq!(deserialized, order);
    }
}
