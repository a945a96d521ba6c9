//! Order aggregate and related types.

mod aggregate;
mod events;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use events::{
    CheckoutRequestedData, FailureKind, InvoiceCreatedData, OrderCancelledData,
    OrderConfirmedData, OrderFailedData, PaymentAuthorizedData, PaymentDeclinedData, SagaEvent,
};
pub use state::OrderState;
pub use value_objects::{
    CartSnapshot, LineItem, Money, PaymentInstrument, PaymentMethod, ProductId, ShippingAddress,
};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The cart snapshot has no items.
    #[error("Cart is empty")]
    EmptyCart,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: String, price: i64 },

    /// The cart total does not fit in an amount of cents.
    #[error("Order total overflows at {product_id}")]
    AmountOverflow { product_id: String },

    /// A shipping address field is blank.
    #[error("Shipping address is missing {field}")]
    IncompleteShippingAddress { field: &'static str },

    /// No payment instrument reference was given.
    #[error("Payment instrument reference is required")]
    MissingPaymentInstrument,

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderState,
        action: &'static str,
    },

    /// The order has not been checked out yet.
    #[error("Order has not been created")]
    NotCreated,
}

impl OrderError {
    /// Returns true if the error is caused by bad checkout input.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            OrderError::InvalidStateTransition { .. } | OrderError::NotCreated
        )
    }
}
