//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in the fulfillment saga.
///
/// State transitions:
/// ```text
/// PendingPayment ──┬──► Confirmed ──► Cancelled
///                  │
///                  └──► Failed
/// ```
///
/// Transitions are monotonic: nothing ever re-enters `PendingPayment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Order persisted, payment authorization outstanding.
    #[default]
    PendingPayment,

    /// Payment authorized; items and total are frozen.
    Confirmed,

    /// Payment declined or unavailable (terminal state).
    Failed,

    /// Cancelled by an administrative compensation (terminal state).
    Cancelled,
}

impl OrderState {
    /// Returns true if the order can be confirmed in this state.
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderState::PendingPayment)
    }

    /// Returns true if the order can fail in this state.
    pub fn can_fail(&self) -> bool {
        matches!(self, OrderState::PendingPayment)
    }

    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderState::Confirmed)
    }

    /// Returns true if the saga for this order has finished.
    ///
    /// `Confirmed` counts as settled for the saga even though an
    /// administrative cancellation may still follow.
    pub fn is_settled(&self) -> bool {
        !matches!(self, OrderState::PendingPayment)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Failed | OrderState::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        match next {
            OrderState::PendingPayment => false,
            OrderState::Confirmed => self.can_confirm(),
            OrderState::Failed => self.can_fail(),
            OrderState::Cancelled => self.can_cancel(),
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingPayment => "PendingPayment",
            OrderState::Confirmed => "Confirmed",
            OrderState::Failed => "Failed",
            OrderState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
