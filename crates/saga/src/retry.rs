//! Named backoff policies.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter, bounded by a maximum attempt count.
///
/// Attempts are 1-based: attempt 1 is the first try, and
/// `delay_for(n)` is the pause after attempt `n` failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Relative jitter, e.g. 0.1 for ±10%.
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Policy for the synchronous authorization call.
    pub fn authorization() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter: 0.1,
        }
    }

    /// Policy for redelivering messages whose processing failed transiently.
    pub fn consumer() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
        }
    }

    /// Sets the maximum attempt count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns true if another attempt may follow a failed `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Returns the pause after a failed `attempt`, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0)).min(self.max_delay)
    }

    /// Returns the pause after a failed `attempt` without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::consumer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(350),
            jitter: 0.0,
        }
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(100), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = BackoffPolicy {
            jitter: 0.1,
            max_delay: Duration::from_secs(10),
            ..policy()
        };
        for _ in 0..100 {
            let d = p.delay_for(2);
            assert!(d >= Duration::from_millis(180) && d <= Duration::from_millis(220));
        }
    }

    #[test]
    fn retry_bound() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
        assert_eq!(p.with_max_attempts(0).max_attempts, 1);
    }
}
