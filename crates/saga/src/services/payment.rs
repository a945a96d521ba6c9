//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, PaymentAttemptId};
use domain::{Money, PaymentInstrument};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// A request to reserve funds on a payment instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    /// Forwarded to the gateway so it can dedupe retried calls itself.
    pub idempotency_key: String,
    pub attempt_id: PaymentAttemptId,
    pub order_id: OrderId,
    pub amount: Money,
    pub instrument: PaymentInstrument,
}

/// Definitive answer of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeResult {
    Approved { transaction_ref: String },
    Declined { reason: String },
}

/// Trait for payment gateway operations.
///
/// Timeouts and connection failures must surface as
/// [`SagaError::TransientInfra`]; a decline is a successful call.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResult>;
}

#[derive(Debug, Default)]
struct GatewayState {
    /// Approved charges by idempotency key.
    charges: HashMap<String, (OrderId, Money, String)>,
    next_id: u32,
    calls: u32,
    decline_reason: Option<String>,
    fail_next: u32,
    latency: Duration,
}

/// In-memory payment gateway for testing.
///
/// Approved charges are the financial side effect the saga must never
/// duplicate; [`InMemoryPaymentGateway::charge_count`] counts them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<GatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway that approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every charge with `reason`, or approves again with None.
    pub async fn set_decline(&self, reason: Option<&str>) {
        self.state.write().await.decline_reason = reason.map(str::to_string);
    }

    /// Fails the next `count` calls as if the gateway were unreachable.
    pub async fn fail_next_charges(&self, count: u32) {
        self.state.write().await.fail_next = count;
    }

    /// Delays every call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.write().await.latency = latency;
    }

    /// Returns the number of approved charges.
    pub async fn charge_count(&self) -> usize {
        self.state.read().await.charges.len()
    }

    /// Returns the number of calls, failed ones included.
    pub async fn call_count(&self) -> u32 {
        self.state.read().await.calls
    }

    /// Returns the total amount charged for an order.
    pub async fn charged_for(&self, order_id: OrderId) -> Money {
        self.state
            .read()
            .await
            .charges
            .values()
            .filter(|(id, _, _)| *id == order_id)
            .fold(Money::zero(), |acc, (_, amount, _)| {
                acc.checked_add(*amount).unwrap_or(acc)
            })
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResult> {
        let latency = {
            let mut state = self.state.write().await;
            state.calls += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.write().await;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SagaError::TransientInfra(
                "payment gateway unreachable".to_string(),
            ));
        }

        if let Some((_, _, transaction_ref)) = state.charges.get(&request.idempotency_key) {
            return Ok(ChargeResult::Approved {
                transaction_ref: transaction_ref.clone(),
            });
        }

        if let Some(reason) = &state.decline_reason {
            return Ok(ChargeResult::Declined {
                reason: reason.clone(),
            });
        }

        state.next_id += 1;
        let transaction_ref = format!("TXN-{:06}", state.next_id);
        state.charges.insert(
            request.idempotency_key.clone(),
            (request.order_id, request.amount, transaction_ref.clone()),
        );

        Ok(ChargeResult::Approved { transaction_ref })
    }
}
