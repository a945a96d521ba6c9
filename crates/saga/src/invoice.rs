//! Invoice generator.
//!
//! Bills each confirmed order exactly once. The idempotency claim is the
//! primary guard; the invoice row itself is the secondary one, which covers
//! a lost idempotency record.

use std::sync::Arc;

use async_trait::async_trait;
use common::{EventId, OrderId};
use domain::{DomainEvent, Invoice, SagaEvent};
use event_log::Delivery;
use idempotency::{ClaimOutcome, IdempotencyStore};

use crate::dead_letter::MessageHandler;
use crate::error::{Result, SagaError};
use crate::notification::{Notification, NotificationTransport};
use crate::outbox::{Outbox, Publication, decode_committed};
use crate::stores::InvoiceRepository;
use crate::topics::{INVOICE_GENERATOR, INVOICES};

/// Event id of an order's `InvoiceCreated` event.
pub fn invoice_event_id(order_id: OrderId) -> EventId {
    EventId::derived(&format!("invoice-created:{order_id}"))
}

/// Consumes `OrderConfirmed` events and produces invoices.
#[derive(Clone)]
pub struct InvoiceGenerator {
    invoices: Arc<dyn InvoiceRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    notifier: Arc<dyn NotificationTransport>,
    outbox: Outbox,
}

impl InvoiceGenerator {
    pub fn new(
        invoices: Arc<dyn InvoiceRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        notifier: Arc<dyn NotificationTransport>,
        outbox: Outbox,
    ) -> Self {
        Self {
            invoices,
            idempotency,
            notifier,
            outbox,
        }
    }

    /// Republishes invoices that were stored but never announced.
    pub async fn republish_unpublished(&self) -> Result<usize> {
        self.outbox.republish(INVOICE_GENERATOR).await
    }

    async fn release_claim(&self, key: &str) {
        if let Err(e) = self.idempotency.release(INVOICE_GENERATOR, key).await {
            tracing::warn!(key, error = %e, "Failed to release invoice claim");
        }
    }
}

#[async_trait]
impl MessageHandler for InvoiceGenerator {
    fn name(&self) -> &str {
        INVOICE_GENERATOR
    }

    #[tracing::instrument(skip(self, delivery), fields(event_id = %delivery.record.event_id))]
    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let event = SagaEvent::from_record(&delivery.record)
            .map_err(|e| SagaError::Malformed(e.to_string()))?;
        let SagaEvent::OrderConfirmed(confirmed) = &event else {
            tracing::trace!(event_type = event.event_type(), "Ignoring event");
            return Ok(());
        };

        let order_id = confirmed.order_id;
        let key = order_id.to_string();

        if let ClaimOutcome::AlreadyClaimed(record) =
            self.idempotency.try_claim(INVOICE_GENERATOR, &key).await?
        {
            let Some(committed) = decode_committed::<Invoice>(&record)? else {
                return Err(SagaError::InProgress {
                    consumer: INVOICE_GENERATOR.to_string(),
                    key,
                });
            };
            if !record.published {
                self.outbox
                    .publish(INVOICE_GENERATOR, &key, &committed.publications)
                    .await;
            }
            return Err(SagaError::DuplicateProcessing {
                consumer: INVOICE_GENERATOR.to_string(),
                key,
            });
        }

        let invoice = match self.invoices.find_by_order(order_id).await {
            Ok(Some(existing)) => {
                tracing::info!(%order_id, "Invoice already stored; completing claim");
                existing
            }
            Ok(None) => {
                let invoice = Invoice::from_confirmation(confirmed);
                if let Err(e) = self.invoices.insert_if_absent(invoice.clone()).await {
                    self.release_claim(&key).await;
                    return Err(e);
                }
                invoice
            }
            Err(e) => {
                self.release_claim(&key).await;
                return Err(e);
            }
        };

        let created = invoice.created_event();
        let event_id = invoice_event_id(order_id);
        let publications = vec![Publication::new(
            INVOICES,
            created.to_record(event_id, Some(delivery.record.event_id))?,
        )];

        if let Err(e) = self
            .outbox
            .commit(INVOICE_GENERATOR, &key, &invoice, &publications)
            .await
        {
            self.release_claim(&key).await;
            return Err(e);
        }

        self.notifier
            .push(created.user_id(), Notification::new(event_id, created.clone()));
        self.outbox
            .publish(INVOICE_GENERATOR, &key, &publications)
            .await;

        tracing::info!(%order_id, invoice_id = %invoice.id, amount = %invoice.amount, "Invoice created");
        metrics::counter!("invoices_created_total").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationHub;
    use crate::stores::InMemoryInvoiceRepository;
    use chrono::Utc;
    use common::UserId;
    use domain::{LineItem, Money, OrderConfirmedData, PaymentMethod};
    use event_log::{EventLog, InMemoryEventLog, LogRecord};
    use idempotency::InMemoryIdempotencyStore;

    struct Fixture {
        log: InMemoryEventLog,
        repo: InMemoryInvoiceRepository,
        store: InMemoryIdempotencyStore,
        generator: InvoiceGenerator,
    }

    fn fixture() -> Fixture {
        let log = InMemoryEventLog::new();
        let repo = InMemoryInvoiceRepository::new();
        let store = InMemoryIdempotencyStore::new();
        let generator = InvoiceGenerator::new(
            Arc::new(repo.clone()),
            Arc::new(store.clone()),
            Arc::new(NotificationHub::default()),
            Outbox::new(Arc::new(log.clone()), Arc::new(store.clone())),
        );
        Fixture {
            log,
            repo,
            store,
            generator,
        }
    }

    async fn deliver(log: &InMemoryEventLog, record: LogRecord) -> Delivery {
        log.publish("orders", record).await.unwrap();
        log.poll("orders", INVOICE_GENERATOR, 0).await.unwrap().unwrap()
    }

    fn confirmed() -> LogRecord {
        let order_id = OrderId::new();
        SagaEvent::OrderConfirmed(OrderConfirmedData {
            order_id,
            user_id: UserId::new(),
            items: vec![LineItem::new("SKU-001", "Widget", 2, Money::from_cents(2999))],
            total: Money::from_cents(5998),
            transaction_ref: "TXN-000001".to_string(),
            payment_method: PaymentMethod::BankTransfer,
            confirmed_at: Utc::now(),
        })
        .to_record(EventId::derived(&format!("order-terminal:{order_id}")), None)
        .unwrap()
    }

    #[tokio::test]
    async fn test_creates_invoice_once() {
        let f = fixture();
        let delivery = deliver(&f.log, confirmed()).await;

        f.generator.handle(&delivery).await.unwrap();
        let again = f.generator.handle(&delivery).await.unwrap_err();

        assert!(again.is_duplicate());
        assert_eq!(f.repo.count().await.unwrap(), 1);
        assert_eq!(f.log.record_count(INVOICES).await, 1);

        let invoice = f.repo.find_by_order(delivery.record.order_id).await.unwrap().unwrap();
        assert_eq!(invoice.amount, Money::from_cents(5998));
        assert_eq!(invoice.transaction_ref, "TXN-000001");
        assert_eq!(invoice.payment_method, PaymentMethod::BankTransfer);

        let published = f.log.records(INVOICES).await.pop().unwrap();
        let SagaEvent::InvoiceCreated(data) = SagaEvent::from_record(&published).unwrap() else {
            panic!("expected InvoiceCreated");
        };
        assert_eq!(data.transaction_ref, "TXN-000001");
        assert_eq!(data.payment_method, PaymentMethod::BankTransfer);
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let f = fixture();
        let record = SagaEvent::order_failed(
            OrderId::new(),
            UserId::new(),
            domain::FailureKind::PaymentDeclined,
            "declined",
        )
        .to_record(EventId::new(), None)
        .unwrap();
        let delivery = deliver(&f.log, record).await;

        f.generator.handle(&delivery).await.unwrap();
        assert_eq!(f.repo.count().await.unwrap(), 0);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_failure_releases_claim() {
        let f = fixture();
        f.repo.fail_next_inserts(1).await;
        let delivery = deliver(&f.log, confirmed()).await;

        let err = f.generator.handle(&delivery).await.unwrap_err();
        assert!(err.is_transient());

        f.generator.handle(&delivery).await.unwrap();
        assert_eq!(f.repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_existing_invoice_row_prevents_second_invoice() {
        let f = fixture();
        let delivery = deliver(&f.log, confirmed()).await;

        f.generator.handle(&delivery).await.unwrap();

        // Same invoice table, empty idempotency store: the record was lost.
        let fresh = fixture_with(&f);
        fresh.generator.handle(&delivery).await.unwrap();

        assert_eq!(f.repo.count().await.unwrap(), 1);
        assert!(fresh.store.get(INVOICE_GENERATOR, &delivery.record.order_id.to_string()).await.unwrap().unwrap().is_completed());
    }

    fn fixture_with(f: &Fixture) -> Fixture {
        let store = InMemoryIdempotencyStore::new();
        let generator = InvoiceGenerator::new(
            Arc::new(f.repo.clone()),
            Arc::new(store.clone()),
            Arc::new(NotificationHub::default()),
            Outbox::new(Arc::new(f.log.clone()), Arc::new(store.clone())),
        );
        Fixture {
            log: f.log.clone(),
            repo: f.repo.clone(),
            store,
            generator,
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanent() {
        let f = fixture();
        let record = LogRecord::builder()
            .order_id(OrderId::new())
            .event_type("OrderConfirmed")
            .payload_raw(serde_json::json!({"type": "OrderConfirmed", "data": {"bogus": true}}))
            .build();
        let delivery = deliver(&f.log, record).await;

        let err = f.generator.handle(&delivery).await.unwrap_err();
        assert!(matches!(err, SagaError::Malformed(_)));
        assert!(!err.is_transient());
    }
}
