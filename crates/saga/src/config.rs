//! Saga tunables.

use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Configuration shared by the saga components.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Upper bound on one payment gateway call.
    pub authorization_timeout: Duration,

    /// Retry policy of the synchronous authorization call.
    pub authorization_backoff: BackoffPolicy,

    /// Redelivery policy applied by the dead-letter router.
    pub consumer_backoff: BackoffPolicy,

    /// Pause between polls of an empty partition.
    pub poll_interval: Duration,

    /// Buffered notifications per subscription before events are dropped.
    pub notification_capacity: usize,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            authorization_timeout: Duration::from_secs(2),
            authorization_backoff: BackoffPolicy::authorization(),
            consumer_backoff: BackoffPolicy::consumer(),
            poll_interval: Duration::from_millis(50),
            notification_capacity: 64,
        }
    }
}
