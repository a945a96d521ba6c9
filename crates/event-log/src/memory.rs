use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    Delivery, EventLogError, LogRecord, Offset, Result,
    log::{EventLog, partition_for},
};

/// Per (topic, group, partition) consumption state.
#[derive(Debug, Default)]
struct Cursor {
    committed: Offset,
    in_flight: bool,
    attempts: u32,
    first_delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LogState {
    /// Records per topic, one vector per partition.
    topics: HashMap<String, Vec<Vec<LogRecord>>>,
    cursors: HashMap<(String, String, u32), Cursor>,
    fail_next_publishes: u32,
}

/// In-memory event log implementation.
///
/// Provides the same delivery contract as a partitioned broker: per-key
/// ordering, one in-flight message per (group, partition), redelivery of
/// anything not acknowledged.
#[derive(Clone)]
pub struct InMemoryEventLog {
    state: Arc<RwLock<LogState>>,
    partitions: u32,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventLog {
    /// Creates a new empty log with a single partition per topic.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Creates a new empty log with the given number of partitions per topic.
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(LogState::default())),
            partitions: partitions.max(1),
        }
    }

    /// Makes the next `count` publish calls fail with `Unavailable`.
    pub async fn fail_next_publishes(&self, count: u32) {
        self.state.write().await.fail_next_publishes = count;
    }

    /// Returns every record of a topic, in partition then offset order.
    pub async fn records(&self, topic: &str) -> Vec<LogRecord> {
        let state = self.state.read().await;
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of records published to a topic.
    pub async fn record_count(&self, topic: &str) -> usize {
        let state = self.state.read().await;
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Returns the number of records a group has not yet acknowledged on a topic.
    pub async fn lag(&self, topic: &str, group: &str) -> u64 {
        let state = self.state.read().await;
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        partitions
            .iter()
            .enumerate()
            .map(|(partition, records)| {
                let committed = state
                    .cursors
                    .get(&(topic.to_string(), group.to_string(), partition as u32))
                    .map(|c| c.committed.as_u64())
                    .unwrap_or(0);
                (records.len() as u64).saturating_sub(committed)
            })
            .sum()
    }

    fn cursor_key(delivery: &Delivery) -> (String, String, u32) {
        (
            delivery.topic.clone(),
            delivery.group.clone(),
            delivery.partition,
        )
    }

    fn unknown_delivery(delivery: &Delivery) -> EventLogError {
        EventLogError::UnknownDelivery {
            topic: delivery.topic.clone(),
            group: delivery.group.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn publish(&self, topic: &str, record: LogRecord) -> Result<Offset> {
        let mut state = self.state.write().await;

        if state.fail_next_publishes > 0 {
            state.fail_next_publishes -= 1;
            return Err(EventLogError::Unavailable(format!(
                "publish to {topic} rejected"
            )));
        }

        let partition = partition_for(record.order_id, self.partitions) as usize;
        let partitions = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);

        let records = &mut partitions[partition];
        let offset = Offset::new(records.len() as u64);
        tracing::debug!(
            topic,
            partition,
            %offset,
            event_type = %record.event_type,
            event_id = %record.event_id,
            "record published"
        );
        records.push(record);
        metrics::counter!("event_log_published_total", "topic" => topic.to_string()).increment(1);

        Ok(offset)
    }

    async fn poll(&self, topic: &str, group: &str, partition: u32) -> Result<Option<Delivery>> {
        let mut state = self.state.write().await;

        let key = (topic.to_string(), group.to_string(), partition);
        let committed = {
            let cursor = state.cursors.entry(key.clone()).or_default();
            if cursor.in_flight {
                return Ok(None);
            }
            cursor.committed
        };

        let Some(record) = state
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .and_then(|records| records.get(committed.as_u64() as usize))
            .cloned()
        else {
            return Ok(None);
        };

        let cursor = state.cursors.entry(key).or_default();
        cursor.in_flight = true;
        cursor.attempts += 1;
        let first_delivered_at = *cursor.first_delivered_at.get_or_insert_with(Utc::now);

        Ok(Some(Delivery {
            record,
            topic: topic.to_string(),
            group: group.to_string(),
            partition,
            offset: committed,
            attempt: cursor.attempts,
            first_delivered_at,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.write().await;
        let cursor = state
            .cursors
            .get_mut(&Self::cursor_key(delivery))
            .filter(|c| c.in_flight && c.committed == delivery.offset)
            .ok_or_else(|| Self::unknown_delivery(delivery))?;

        cursor.committed = delivery.offset.next();
        cursor.in_flight = false;
        cursor.attempts = 0;
        cursor.first_delivered_at = None;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.write().await;
        let cursor = state
            .cursors
            .get_mut(&Self::cursor_key(delivery))
            .filter(|c| c.in_flight && c.committed == delivery.offset)
            .ok_or_else(|| Self::unknown_delivery(delivery))?;

        cursor.in_flight = false;
        Ok(())
    }

    async fn replay(&self, topic: &str) -> Result<Vec<LogRecord>> {
        Ok(self.records(topic).await)
    }

    fn partition_count(&self) -> u32 {
        self.partitions
    }
}
