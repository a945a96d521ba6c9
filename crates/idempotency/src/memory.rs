use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    ClaimOutcome, ClaimStatus, IdempotencyConfig, IdempotencyError, IdempotencyRecord, Result,
    store::IdempotencyStore,
};

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<(String, String), IdempotencyRecord>,
    unavailable: bool,
}

/// In-memory idempotency store.
///
/// Every operation runs under one write lock, which makes claim-or-get a
/// single atomic step.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    state: Arc<RwLock<StoreState>>,
    config: IdempotencyConfig,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdempotencyStore {
    /// Creates an empty store with the default retention settings.
    pub fn new() -> Self {
        Self::with_config(IdempotencyConfig::default())
    }

    /// Creates an empty store with custom retention settings.
    pub fn with_config(config: IdempotencyConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            config,
        }
    }

    /// Makes every operation fail with `Unavailable` until reset.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Returns the number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(state: &StoreState) -> Result<()> {
        if state.unavailable {
            return Err(IdempotencyError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn key(consumer: &str, key: &str) -> (String, String) {
        (consumer.to_string(), key.to_string())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_claim(&self, consumer: &str, key: &str) -> Result<ClaimOutcome> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let now = Utc::now();
        let map_key = Self::key(consumer, key);

        if let Some(existing) = state.records.get(&map_key)
            && !existing.is_expired(now)
        {
            tracing::debug!(consumer, key, status = existing.status.as_str(), "claim already held");
            metrics::counter!("idempotency_claims_total", "consumer" => consumer.to_string(), "outcome" => "already_claimed").increment(1);
            return Ok(ClaimOutcome::AlreadyClaimed(existing.clone()));
        }

        state.records.insert(
            map_key,
            IdempotencyRecord {
                consumer: consumer.to_string(),
                key: key.to_string(),
                status: ClaimStatus::Pending,
                result: None,
                published: false,
                claimed_at: now,
                expires_at: self.config.lease_until(now),
            },
        );
        metrics::counter!("idempotency_claims_total", "consumer" => consumer.to_string(), "outcome" => "claimed").increment(1);

        Ok(ClaimOutcome::Claimed)
    }

    async fn record_result(
        &self,
        consumer: &str,
        key: &str,
        result: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let now = Utc::now();
        let record = state
            .records
            .get_mut(&Self::key(consumer, key))
            .filter(|r| r.status == ClaimStatus::Pending)
            .ok_or_else(|| IdempotencyError::not_held(consumer, key, "pending"))?;

        record.status = ClaimStatus::Completed;
        record.result = Some(result);
        record.published = false;
        record.expires_at = self.config.retain_until(now);
        Ok(())
    }

    async fn release(&self, consumer: &str, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let map_key = Self::key(consumer, key);
        if state
            .records
            .get(&map_key)
            .is_some_and(|r| r.status == ClaimStatus::Pending)
        {
            state.records.remove(&map_key);
        }
        Ok(())
    }

    async fn mark_published(&self, consumer: &str, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let record = state
            .records
            .get_mut(&Self::key(consumer, key))
            .filter(|r| r.status == ClaimStatus::Completed)
            .ok_or_else(|| IdempotencyError::not_held(consumer, key, "completed"))?;

        record.published = true;
        Ok(())
    }

    async fn unpublished(&self, consumer: &str) -> Result<Vec<IdempotencyRecord>> {
        let state = self.state.read().await;
        Self::check_available(&state)?;

        let now = Utc::now();
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| {
                r.consumer == consumer && r.is_completed() && !r.published && !r.is_expired(now)
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.claimed_at);
        Ok(records)
    }

    async fn get(&self, consumer: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let state = self.state.read().await;
        Self::check_available(&state)?;

        let now = Utc::now();
        Ok(state
            .records
            .get(&Self::key(consumer, key))
            .filter(|r| !r.is_expired(now))
            .cloned())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let now = Utc::now();
        let before = state.records.len();
        state.records.retain(|_, r| !r.is_expired(now));
        let purged = (before - state.records.len()) as u64;

        if purged > 0 {
            tracing::info!(purged, "purged expired idempotency records");
        }
        Ok(purged)
    }
}
