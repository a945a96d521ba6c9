use async_trait::async_trait;

use crate::{Delivery, LogRecord, Offset, OrderId, Result};

/// Returns the partition a key is routed to.
///
/// Stable across processes and restarts: the same order id always maps to the
/// same partition for a given partition count.
pub fn partition_for(order_id: OrderId, partition_count: u32) -> u32 {
    let count = partition_count.max(1) as u128;
    (order_id.as_uuid().as_u128() % count) as u32
}

/// Core trait for event log implementations.
///
/// The contract is the one a partitioned broker offers:
/// - records are appended to the partition chosen by their order id;
/// - ordering holds within a partition, never across partitions;
/// - each consumer group pulls one message at a time per partition and must
///   acknowledge it before the next one is handed out;
/// - unacknowledged messages are redelivered (at-least-once).
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends a record to a topic. Returns the record's offset in its partition.
    async fn publish(&self, topic: &str, record: LogRecord) -> Result<Offset>;

    /// Pulls the next message for a consumer group from one partition.
    ///
    /// Returns None when the partition is drained or its head message is
    /// already in flight for the group.
    async fn poll(&self, topic: &str, group: &str, partition: u32) -> Result<Option<Delivery>>;

    /// Acknowledges a delivery, committing the group's offset past it.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Rejects a delivery. The same message is handed out again by a later poll.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Returns every record of a topic in partition, then offset, order.
    async fn replay(&self, topic: &str) -> Result<Vec<LogRecord>>;

    /// Returns the number of partitions per topic.
    fn partition_count(&self) -> u32;
}

/// Extension trait providing convenience methods for event logs.
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Publishes a batch of records in order.
    async fn publish_all(&self, topic: &str, records: Vec<LogRecord>) -> Result<Vec<Offset>> {
        let mut offsets = Vec::with_capacity(records.len());
        for record in records {
            offsets.push(self.publish(topic, record).await?);
        }
        Ok(offsets)
    }

    /// Returns the partition a record would be published to.
    fn partition_of(&self, record: &LogRecord) -> u32 {
        partition_for(record.order_id, self.partition_count())
    }

    /// Returns every record of a topic concerning one order, in publish order.
    async fn replay_order(&self, topic: &str, order_id: OrderId) -> Result<Vec<LogRecord>> {
        Ok(self
            .replay(topic)
            .await?
            .into_iter()
            .filter(|r| r.order_id == order_id)
            .collect())
    }
}

// Blanket implementation for all EventLog implementations
impl<T: EventLog + ?Sized> EventLogExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for _ in 0..100 {
            let id = OrderId::new();
            let p = partition_for(id, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(id, 4));
        }
    }

    #[test]
    fn zero_partitions_treated_as_one() {
        assert_eq!(partition_for(OrderId::new(), 0), 0);
    }
}
