//! Publish-after-commit.
//!
//! A producer first records its result (including the records it is about to
//! publish) in the idempotency store, then publishes, then marks the result
//! published. A crash between commit and publish leaves an unpublished
//! result behind, which [`Outbox::republish`] picks up.

use std::sync::Arc;

use event_log::{EventLog, LogRecord};
use idempotency::IdempotencyStore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;

/// A record bound for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub topic: String,
    pub record: LogRecord,
}

impl Publication {
    pub fn new(topic: impl Into<String>, record: LogRecord) -> Self {
        Self {
            topic: topic.into(),
            record,
        }
    }
}

/// The result summary stored with a completed claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedResult<T> {
    pub summary: T,
    pub publications: Vec<Publication>,
}

/// Commits results to the idempotency store and publishes their records.
#[derive(Clone)]
pub struct Outbox {
    log: Arc<dyn EventLog>,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl Outbox {
    pub fn new(log: Arc<dyn EventLog>, idempotency: Arc<dyn IdempotencyStore>) -> Self {
        Self { log, idempotency }
    }

    /// Completes the claim `(consumer, key)` with a summary and the records
    /// to publish.
    pub async fn commit<T: Serialize>(
        &self,
        consumer: &str,
        key: &str,
        summary: &T,
        publications: &[Publication],
    ) -> Result<()> {
        let result = serde_json::to_value(CommittedResult {
            summary,
            publications: publications.to_vec(),
        })?;
        self.idempotency.record_result(consumer, key, result).await?;
        Ok(())
    }

    /// Publishes committed records and marks them published.
    ///
    /// Returns false if anything failed; the result then stays unpublished
    /// and is retried by [`Outbox::republish`].
    pub async fn publish(&self, consumer: &str, key: &str, publications: &[Publication]) -> bool {
        for publication in publications {
            if let Err(e) = self
                .log
                .publish(&publication.topic, publication.record.clone())
                .await
            {
                tracing::warn!(
                    consumer,
                    key,
                    topic = %publication.topic,
                    event_id = %publication.record.event_id,
                    error = %e,
                    "Publish after commit failed; left for recovery"
                );
                return false;
            }
        }

        if let Err(e) = self.idempotency.mark_published(consumer, key).await {
            // Republishing later is harmless: consumers dedupe on event id
            // and order id.
            tracing::warn!(consumer, key, error = %e, "Failed to mark result published");
            return false;
        }
        true
    }

    /// Republishes every committed but unpublished result of `consumer`.
    ///
    /// Returns how many results were published.
    #[tracing::instrument(skip(self))]
    pub async fn republish(&self, consumer: &str) -> Result<usize> {
        let pending = self.idempotency.unpublished(consumer).await?;
        let mut published = 0;

        for record in pending {
            let Some(result) = record.decode_result::<CommittedResult<serde_json::Value>>()? else {
                continue;
            };
            if self.publish(consumer, &record.key, &result.publications).await {
                published += 1;
            }
        }

        if published > 0 {
            tracing::info!(consumer, published, "Republished committed results");
        }
        Ok(published)
    }
}

/// Decodes the summary of a committed result.
pub fn decode_committed<T: DeserializeOwned>(
    record: &idempotency::IdempotencyRecord,
) -> Result<Option<CommittedResult<T>>> {
    Ok(record.decode_result::<CommittedResult<T>>()?)
}
