use async_trait::async_trait;

use crate::{ClaimOutcome, IdempotencyRecord, Result};

/// Core trait for idempotency store implementations.
///
/// Keys are scoped by consumer name, so the same dedup key (usually an order
/// id) can be claimed independently by every consumer.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claims `(consumer, key)`.
    ///
    /// Returns `Claimed` if no live record exists (an expired record counts
    /// as absent). Otherwise returns the existing record without modifying
    /// it. Concurrent calls for the same pair have exactly one winner.
    async fn try_claim(&self, consumer: &str, key: &str) -> Result<ClaimOutcome>;

    /// Completes a pending claim with a result summary.
    ///
    /// The record is retained for the configured retention window from now
    /// and starts out unpublished.
    async fn record_result(
        &self,
        consumer: &str,
        key: &str,
        result: serde_json::Value,
    ) -> Result<()>;

    /// Abandons a pending claim so a redelivery can retry.
    ///
    /// Completed records are left untouched.
    async fn release(&self, consumer: &str, key: &str) -> Result<()>;

    /// Marks the event derived from a completed result as published.
    async fn mark_published(&self, consumer: &str, key: &str) -> Result<()>;

    /// Returns completed, unexpired records of a consumer whose event was
    /// never published, oldest first.
    async fn unpublished(&self, consumer: &str) -> Result<Vec<IdempotencyRecord>>;

    /// Returns the live record for `(consumer, key)`, if any.
    async fn get(&self, consumer: &str, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Deletes expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}
