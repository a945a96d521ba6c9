//! Consumer loop with redelivery and dead-lettering.
//!
//! Every consumer handler runs behind a [`DeadLetterRouter`]. Transient
//! failures are redelivered after a backoff delay until the attempt budget
//! runs out; permanent failures and exhausted messages are copied to
//! `<topic>.dead-letter` and acknowledged. A message whose dead-letter copy
//! cannot be written is redelivered, never dropped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use event_log::{Delivery, EventLog, LogRecord, dead_letter_topic};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, SagaError};
use crate::retry::BackoffPolicy;

/// A consumer of one topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Consumer group name, also used as the idempotency scope.
    fn name(&self) -> &str;

    /// Processes one delivery. Returning Ok acknowledges it.
    async fn handle(&self, delivery: &Delivery) -> Result<()>;
}

/// A message that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_topic: String,

    /// Partition key of the original message.
    pub original_key: OrderId,

    pub consumer: String,
    pub failure_reason: String,
    pub first_seen_at: DateTime<Utc>,

    /// Deliveries made before giving up; at least 1.
    pub attempt_count: u32,

    pub dead_lettered_at: DateTime<Utc>,
    pub original: LogRecord,
}

impl DeadLetterRecord {
    pub const EVENT_TYPE: &'static str = "DeadLettered";

    fn from_delivery(delivery: &Delivery, error: &SagaError) -> Self {
        Self {
            original_topic: delivery.topic.clone(),
            original_key: delivery.record.order_id,
            consumer: delivery.group.clone(),
            failure_reason: error.to_string(),
            first_seen_at: delivery.first_delivered_at,
            attempt_count: delivery.attempt.max(1),
            dead_lettered_at: Utc::now(),
            original: delivery.record.clone(),
        }
    }

    /// Wraps the record for the dead-letter topic.
    ///
    /// The id is derived from the original message and consumer, so a
    /// repeated dead-lettering of the same message is recognisable.
    pub fn to_log_record(&self) -> Result<LogRecord> {
        let event_id = EventId::derived(&format!(
            "dead-letter:{}:{}:{}",
            self.original_topic, self.consumer, self.original.event_id
        ));
        Ok(LogRecord::builder()
            .event_id(event_id)
            .order_id(self.original_key)
            .event_type(Self::EVENT_TYPE)
            .causation_id(Some(self.original.event_id))
            .produced_at(self.dead_lettered_at)
            .payload(self)?
            .build())
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed, or recognised as already processed.
    Acked,

    /// Handed back to the log for another attempt.
    Redelivered,

    /// Copied to the dead-letter topic and acknowledged.
    DeadLettered,
}

/// Applies the redelivery policy to handler outcomes.
#[derive(Clone)]
pub struct DeadLetterRouter {
    log: Arc<dyn EventLog>,
    policy: BackoffPolicy,
}

impl DeadLetterRouter {
    pub fn new(log: Arc<dyn EventLog>, policy: BackoffPolicy) -> Self {
        Self { log, policy }
    }

    /// Runs a handler on a delivery and settles the delivery.
    #[tracing::instrument(
        skip(self, handler, delivery),
        fields(
            consumer = handler.name(),
            topic = %delivery.topic,
            offset = %delivery.offset,
            attempt = delivery.attempt,
        )
    )]
    pub async fn dispatch(
        &self,
        handler: &dyn MessageHandler,
        delivery: &Delivery,
    ) -> Result<Disposition> {
        let error = match handler.handle(delivery).await {
            Ok(()) => {
                self.log.ack(delivery).await?;
                return Ok(Disposition::Acked);
            }
            Err(e) if e.is_duplicate() => {
                tracing::debug!(error = %e, "Duplicate delivery acknowledged");
                self.log.ack(delivery).await?;
                return Ok(Disposition::Acked);
            }
            Err(e) => e,
        };

        if error.is_transient() && self.policy.should_retry(delivery.attempt) {
            let delay = self.policy.delay_for(delivery.attempt);
            tracing::warn!(
                error = %error,
                kind = error.kind(),
                delay_ms = delay.as_millis() as u64,
                "Transient failure; redelivering"
            );
            metrics::counter!("messages_redelivered_total", "consumer" => handler.name().to_string())
                .increment(1);
            tokio::time::sleep(delay).await;
            self.log.nack(delivery).await?;
            return Ok(Disposition::Redelivered);
        }

        self.dead_letter(delivery, &error).await
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &SagaError) -> Result<Disposition> {
        let record = DeadLetterRecord::from_delivery(delivery, error);
        let dlq = dead_letter_topic(&delivery.topic);

        if let Err(e) = self.log.publish(&dlq, record.to_log_record()?).await {
            tracing::error!(error = %e, topic = %dlq, "Dead-letter publish failed; redelivering");
            self.log.nack(delivery).await?;
            return Ok(Disposition::Redelivered);
        }
        self.log.ack(delivery).await?;

        tracing::error!(
            error = %error,
            kind = error.kind(),
            attempts = record.attempt_count,
            event_id = %delivery.record.event_id,
            "Message dead-lettered"
        );
        metrics::counter!(
            "dead_letters_total",
            "topic" => delivery.topic.clone(),
            "consumer" => delivery.group.clone()
        )
        .increment(1);

        Ok(Disposition::DeadLettered)
    }
}

/// Reads the dead-letter channel of `topic`, oldest first.
///
/// Repeated copies of the same message are collapsed.
pub async fn dead_letters(log: &dyn EventLog, topic: &str) -> Result<Vec<DeadLetterRecord>> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for record in log.replay(&dead_letter_topic(topic)).await? {
        if !seen.insert(record.event_id) {
            continue;
        }
        let dead: DeadLetterRecord = record
            .decode()
            .map_err(|e| SagaError::Malformed(e.to_string()))?;
        records.push(dead);
    }

    records.sort_by_key(|r| r.dead_lettered_at);
    Ok(records)
}

/// Pull loop driving one handler over every partition of a topic.
pub struct ConsumerWorker {
    log: Arc<dyn EventLog>,
    router: DeadLetterRouter,
    handler: Arc<dyn MessageHandler>,
    topic: String,
    poll_interval: Duration,
}

impl ConsumerWorker {
    pub fn new(
        log: Arc<dyn EventLog>,
        router: DeadLetterRouter,
        handler: Arc<dyn MessageHandler>,
        topic: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            log,
            router,
            handler,
            topic: topic.into(),
            poll_interval,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Pulls and settles at most one message from a partition.
    pub async fn poll_once(&self, partition: u32) -> Result<Option<Disposition>> {
        let Some(delivery) = self
            .log
            .poll(&self.topic, self.handler.name(), partition)
            .await?
        else {
            return Ok(None);
        };

        let disposition = self
            .router
            .dispatch(self.handler.as_ref(), &delivery)
            .await?;
        Ok(Some(disposition))
    }

    /// Processes messages until every partition is empty.
    ///
    /// Returns the number of deliveries handled, redeliveries included.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let mut progressed = false;
            for partition in 0..self.log.partition_count() {
                while self.poll_once(partition).await?.is_some() {
                    handled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(handled);
            }
        }
    }

    /// Starts one task per partition. Tasks stop once `shutdown` turns true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let worker = Arc::new(self);
        (0..worker.log.partition_count())
            .map(|partition| {
                let worker = Arc::clone(&worker);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run_partition(partition, shutdown).await })
            })
            .collect()
    }

    async fn run_partition(&self, partition: u32, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            consumer = self.handler.name(),
            topic = %self.topic,
            partition,
            "Consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once(partition).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        consumer = self.handler.name(),
                        topic = %self.topic,
                        partition,
                        error = %e,
                        "Poll failed"
                    );
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!(
            consumer = self.handler.name(),
            topic = %self.topic,
            partition,
            "Consumer stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log::InMemoryEventLog;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: AtomicU32,
        error: fn() -> SagaError,
        handled: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: fn() -> SagaError) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error,
                handled: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn handle(&self, _delivery: &Delivery) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
        }
    }

    async fn setup(handler: Flaky) -> (InMemoryEventLog, ConsumerWorker, Arc<Flaky>) {
        let log = InMemoryEventLog::new();
        let record = LogRecord::builder()
            .order_id(OrderId::new())
            .event_type("OrderConfirmed")
            .payload_raw(serde_json::json!({}))
            .build();
        log.publish("orders", record).await.unwrap();

        let handler = Arc::new(handler);
        let worker = ConsumerWorker::new(
            Arc::new(log.clone()),
            DeadLetterRouter::new(Arc::new(log.clone()), policy()),
            handler.clone(),
            "orders",
            Duration::from_millis(10),
        );
        (log, worker, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_redelivered() {
        let (log, worker, handler) =
            setup(Flaky::new(2, || SagaError::TransientInfra("down".into()))).await;

        assert_eq!(worker.drain().await.unwrap(), 3);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(log.record_count("orders.dead-letter").await, 0);
        assert_eq!(log.lag("orders", "flaky").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transient_failures_are_dead_lettered() {
        let (log, worker, handler) =
            setup(Flaky::new(10, || SagaError::TransientInfra("down".into()))).await;

        assert_eq!(worker.drain().await.unwrap(), 3);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);

        let dead = dead_letters(&log, "orders").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt_count, 3);
        assert_eq!(dead[0].consumer, "flaky");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_dead_lettered_immediately() {
        let (log, worker, _) = setup(Flaky::new(1, || SagaError::Malformed("bad".into()))).await;

        assert_eq!(worker.drain().await.unwrap(), 1);
        let dead = dead_letters(&log, "orders").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt_count, 1);
        assert_eq!(dead[0].original_topic, "orders");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_is_acknowledged() {
        let (log, worker, _) = setup(Flaky::new(1, || SagaError::DuplicateProcessing {
            consumer: "flaky".into(),
            key: "k".into(),
        }))
        .await;

        assert_eq!(worker.drain().await.unwrap(), 1);
        assert_eq!(log.record_count("orders.dead-letter").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dead_letter_publish_redelivers() {
        let (log, worker, _) = setup(Flaky::new(1, || SagaError::Malformed("bad".into()))).await;
        log.fail_next_publishes(1).await;

        let first = worker.poll_once(0).await.unwrap();
        assert_eq!(first, Some(Disposition::Redelivered));

        // The second delivery succeeds because the handler only failed once.
        assert_eq!(worker.poll_once(0).await.unwrap(), Some(Disposition::Acked));
        assert_eq!(log.record_count("orders.dead-letter").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_workers_stop_on_shutdown() {
        let (log, worker, handler) =
            setup(Flaky::new(0, || SagaError::TransientInfra("down".into()))).await;
        let (tx, rx) = watch::channel(false);

        let handles = worker.spawn(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(log.lag("orders", "flaky").await, 0);
    }
}
