//! Payment attempts.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentAttemptId};
use serde::{Deserialize, Serialize};

use crate::order::Money;

/// How a single authorization attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentAttemptOutcome {
    Authorized { transaction_ref: String },
    Declined { reason: String },
    Error { message: String },
}

impl PaymentAttemptOutcome {
    /// Returns the outcome name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentAttemptOutcome::Authorized { .. } => "authorized",
            PaymentAttemptOutcome::Declined { .. } => "declined",
            PaymentAttemptOutcome::Error { .. } => "error",
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, PaymentAttemptOutcome::Authorized { .. })
    }
}

/// One call to the payment gateway on behalf of an order.
///
/// Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    /// Derived from the order id and `sequence`.
    pub id: PaymentAttemptId,
    pub order_id: OrderId,

    /// 1-based position among the order's attempts.
    pub sequence: u32,

    pub amount: Money,
    pub instrument_ref: String,

    #[serde(flatten)]
    pub outcome: PaymentAttemptOutcome,

    pub attempted_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// Creates the record of an attempt.
    pub fn new(
        order_id: OrderId,
        sequence: u32,
        amount: Money,
        instrument_ref: impl Into<String>,
        outcome: PaymentAttemptOutcome,
    ) -> Self {
        Self {
            id: PaymentAttemptId::for_attempt(order_id, sequence),
            order_id,
            sequence,
            amount,
            instrument_ref: instrument_ref.into(),
            outcome,
            attempted_at: Utc::now(),
        }
    }
}
