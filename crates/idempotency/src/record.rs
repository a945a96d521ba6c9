use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{IdempotencyError, Result};

/// Retention settings for idempotency records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// How long a completed record is kept.
    ///
    /// Must be at least as long as the event log's redelivery window,
    /// otherwise a late redelivery is processed a second time.
    pub retention: Duration,

    /// How long a pending claim is honored.
    ///
    /// A claimant that crashes mid-processing blocks its key for at most
    /// this long; after that the key can be claimed again.
    pub claim_lease: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            claim_lease: Duration::from_secs(30),
        }
    }
}

impl IdempotencyConfig {
    pub(crate) fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(now, self.claim_lease)
    }

    pub(crate) fn retain_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(now, self.retention)
    }
}

fn saturating_add(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// State of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Claimed, side effect in progress.
    Pending,

    /// Side effect applied and its result recorded.
    Completed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for ClaimStatus {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "completed" => Ok(ClaimStatus::Completed),
            other => Err(IdempotencyError::UnknownStatus(other.to_string())),
        }
    }
}

/// A processed-marker for one (consumer, dedup key) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub consumer: String,
    pub key: String,
    pub status: ClaimStatus,

    /// Result summary, present once completed.
    pub result: Option<serde_json::Value>,

    /// Whether the event derived from the result was published.
    pub published: bool,

    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Returns true if the side effect was applied.
    pub fn is_completed(&self) -> bool {
        self.status == ClaimStatus::Completed
    }

    /// Returns true if the record no longer counts at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Deserializes the result summary.
    ///
    /// Returns None for a pending claim.
    pub fn decode_result<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.result
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(IdempotencyError::from)
    }
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller won the claim and must apply the side effect.
    Claimed,

    /// Someone else holds or completed the claim.
    AlreadyClaimed(IdempotencyRecord),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [ClaimStatus::Pending, ClaimStatus::Completed] {
            assert_eq!(status.as_str().parse::<ClaimStatus>().unwrap(), status);
        }
        assert!(matches!(
            "done".parse::<ClaimStatus>(),
            Err(IdempotencyError::UnknownStatus(_))
        ));
    }

    #[test]
    fn huge_retention_saturates() {
        let config = IdempotencyConfig {
            retention: Duration::MAX,
            claim_lease: Duration::from_secs(1),
        };
        let now = Utc::now();
        assert!(config.retain_until(now) > now);
    }

    #[test]
    fn decode_result_of_pending_claim_is_none() {
        let now = Utc::now();
        let record = IdempotencyRecord {
            consumer: "c".to_string(),
            key: "k".to_string(),
            status: ClaimStatus::Pending,
            result: None,
            published: false,
            claimed_at: now,
            expires_at: now,
        };
        assert_eq!(record.decode_result::<String>().unwrap(), None);
        assert!(record.is_expired(now));
    }
}
