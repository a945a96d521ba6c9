//! Integration tests for the Order aggregate.
//!
//! These tests verify that order state is reconstructed from the event log,
//! including when the log delivers records more than once.

use domain::{
    Aggregate, CartSnapshot, DomainError, EventId, FailureKind, Invoice, LineItem, Money, Order,
    OrderId, OrderState, PaymentInstrument, SagaEvent, ShippingAddress, UserId,
};
use event_log::{EventLog, EventLogExt, InMemoryEventLog, LogRecord};

fn address() -> ShippingAddress {
    ShippingAddress {
        street: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip_code: "62701".to_string(),
        country: "US".to_string(),
    }
}

fn checkout(order_id: OrderId) -> SagaEvent {
    Order::checkout(
        order_id,
        UserId::new(),
        CartSnapshot::new(vec![LineItem::new(
            "SKU-001",
            "Widget",
            3,
            Money::from_cents(999),
        )]),
        PaymentInstrument::card("tok_visa", "4242"),
        address(),
    )
    .unwrap()
}

async fn publish(log: &InMemoryEventLog, event: &SagaEvent) {
    let record = event.to_record(EventId::new(), None).unwrap();
    log.publish("orders", record).await.unwrap();
}

async fn rebuild(log: &InMemoryEventLog, order_id: OrderId) -> Order {
    let records = log.replay_order("orders", order_id).await.unwrap();
    Order::from_events(
        records
            .iter()
            .map(|r| SagaEvent::from_record(r).unwrap()),
    )
}

mod order_lifecycle {
    use super::*;

    #[tokio::test]
    async fn order_rebuilt_from_log() {
        let log = InMemoryEventLog::with_partitions(4);
        let order_id = OrderId::new();

        let opened = checkout(order_id);
        publish(&log, &opened).await;

        let order = Order::from_events([opened]);
        publish(&log, &order.confirm("txn-42").unwrap()).await;

        let rebuilt = rebuild(&log, order_id).await;
        assert_eq!(rebuilt.id(), Some(order_id));
        assert_eq!(rebuilt.state(), OrderState::Confirmed);
        assert_eq!(rebuilt.total().cents(), 2997);
        assert_eq!(rebuilt.transaction_ref(), Some("txn-42"));
    }

    #[tokio::test]
    async fn duplicate_deliveries_do_not_change_the_result() {
        let log = InMemoryEventLog::new();
        let order_id = OrderId::new();

        let opened = checkout(order_id);
        let order = Order::from_events([opened.clone()]);
        let failed = order
            .fail(FailureKind::PaymentDeclined, "insufficient funds")
            .unwrap();

        for event in [&opened, &opened, &failed, &opened, &failed] {
            publish(&log, event).await;
        }

        let rebuilt = rebuild(&log, order_id).await;
        assert_eq!(rebuilt.state(), OrderState::Failed);
        assert_eq!(
            rebuilt.failure(),
            Some((FailureKind::PaymentDeclined, "insufficient funds"))
        );
    }

    #[tokio::test]
    async fn interleaved_orders_are_independent() {
        let log = InMemoryEventLog::with_partitions(2);
        let first = OrderId::new();
        let second = OrderId::new();

        let first_opened = checkout(first);
        let second_opened = checkout(second);
        publish(&log, &first_opened).await;
        publish(&log, &second_opened).await;

        let second_order = Order::from_events([second_opened]);
        publish(&log, &second_order.confirm("txn-2").unwrap()).await;

        assert_eq!(rebuild(&log, first).await.state(), OrderState::PendingPayment);
        assert_eq!(rebuild(&log, second).await.state(), OrderState::Confirmed);
    }

    #[tokio::test]
    async fn invoice_recorded_on_order() {
        let order_id = OrderId::new();
        let mut order = Order::from_events([checkout(order_id)]);

        let SagaEvent::OrderConfirmed(confirmed) = order.confirm("txn-1").unwrap() else {
            panic!("expected OrderConfirmed");
        };
        order.apply(SagaEvent::OrderConfirmed(confirmed.clone()));

        let invoice = Invoice::from_confirmation(&confirmed);
        order.apply(invoice.created_event());

        assert_eq!(order.invoice_id(), Some(invoice.id));
        assert_eq!(invoice.amount, order.total());
    }
}

mod record_decoding {
    use super::*;

    #[test]
    fn record_for_another_order_is_rejected() {
        let event = checkout(OrderId::new());
        let mut record = event.to_record(EventId::new(), None).unwrap();
        record.order_id = OrderId::new();

        assert!(matches!(
            SagaEvent::from_record(&record),
            Err(DomainError::PartitionKeyMismatch { .. })
        ));
    }

    #[test]
    fn non_saga_payload_is_rejected() {
        let record = LogRecord::builder()
            .order_id(OrderId::new())
            .event_type("CheckoutRequested")
            .payload_raw(serde_json::json!("not an event"))
            .build();

        assert!(matches!(
            SagaEvent::from_record(&record),
            Err(DomainError::Serialization(_))
        ));
    }
}
