//! Payment attempt ledger.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::PaymentAttempt;
use tokio::sync::RwLock;

use crate::error::Result;

/// Append-only record of gateway calls.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Appends an attempt. Attempts with an already recorded id are ignored.
    async fn record(&self, attempt: PaymentAttempt) -> Result<()>;

    /// Returns an order's attempts in sequence order.
    async fn attempts_for(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>>;

    /// Returns the sequence number of the order's next attempt.
    async fn next_sequence(&self, order_id: OrderId) -> Result<u32>;
}

/// In-memory payment ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentLedger {
    attempts: Arc<RwLock<HashMap<OrderId, Vec<PaymentAttempt>>>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn record(&self, attempt: PaymentAttempt) -> Result<()> {
        let mut attempts = self.attempts.write().await;
        let entry = attempts.entry(attempt.order_id).or_default();
        if !entry.iter().any(|a| a.id == attempt.id) {
            entry.push(attempt);
            entry.sort_by_key(|a| a.sequence);
        }
        Ok(())
    }

    async fn attempts_for(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        Ok(self
            .attempts
            .read()
            .await
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn next_sequence(&self, order_id: OrderId) -> Result<u32> {
        let attempts = self.attempts.read().await;
        let last = attempts
            .get(&order_id)
            .and_then(|a| a.last())
            .map(|a| a.sequence)
            .unwrap_or(0);
        Ok(last + 1)
    }
}
