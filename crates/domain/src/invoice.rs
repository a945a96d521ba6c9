//! Invoices produced by billing.

use chrono::{DateTime, Utc};
use common::{InvoiceId, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::order::{
    InvoiceCreatedData, LineItem, Money, OrderConfirmedData, PaymentMethod, SagaEvent,
};

/// Lifecycle status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    Generated,
}

/// The single invoice billed for a confirmed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub items: Vec<LineItem>,
    /// Gateway reference of the authorized charge.
    pub transaction_ref: String,
    pub payment_method: PaymentMethod,
    pub generated_at: DateTime<Utc>,
    pub status: InvoiceStatus,
}

impl Invoice {
    /// Builds the invoice for a confirmed order.
    ///
    /// Deterministic: the same confirmation always yields the same invoice,
    /// id and timestamp included.
    pub fn from_confirmation(data: &OrderConfirmedData) -> Self {
        Self {
            id: InvoiceId::for_order(data.order_id),
            order_id: data.order_id,
            user_id: data.user_id,
            amount: data.total,
            items: data.items.clone(),
            transaction_ref: data.transaction_ref.clone(),
            payment_method: data.payment_method,
            generated_at: data.confirmed_at,
            status: InvoiceStatus::Generated,
        }
    }

    /// Returns the event announcing this invoice.
    pub fn created_event(&self) -> SagaEvent {
        SagaEvent::InvoiceCreated(InvoiceCreatedData {
            invoice_id: self.id,
            order_id: self.order_id,
            user_id: self.user_id,
            amount: self.amount,
            transaction_ref: self.transaction_ref.clone(),
            payment_method: self.payment_method,
            created_at: self.generated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmation() -> OrderConfirmedData {
        OrderConfirmedData {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            items: vec![
                LineItem::new("SKU-001", "Widget", 2, Money::from_cents(1999)),
                LineItem::new("SKU-002", "Gadget", 1, Money::from_cents(2000)),
            ],
            total: Money::from_cents(5998),
            transaction_ref: "txn-1".to_string(),
            payment_method: PaymentMethod::Paypal,
            confirmed_at: Utc::now(),
        }
    }

    #[test]
    fn test_invoice_is_deterministic() {
        let data = confirmation();
        let a = Invoice::from_confirmation(&data);
        let b = Invoice::from_confirmation(&data);

        assert_eq!(a, b);
        assert_eq!(a.id, InvoiceId::for_order(data.order_id));
        assert_eq!(a.amount, Money::from_cents(5998));
        assert_eq!(a.status, InvoiceStatus::Generated);
        assert_eq!(a.transaction_ref, "txn-1");
        assert_eq!(a.payment_method, PaymentMethod::Paypal);
    }

    #[test]
    fn test_created_event() {
        let invoice = Invoice::from_confirmation(&confirmation());
        let SagaEvent::InvoiceCreated(data) = invoice.created_event() else {
            panic!("expected InvoiceCreated");
        };
        assert_eq!(data.invoice_id, invoice.id);
        assert_eq!(data.amount, invoice.amount);
        assert_eq!(data.transaction_ref, "txn-1");
        assert_eq!(data.payment_method, PaymentMethod::Paypal);
    }
}
