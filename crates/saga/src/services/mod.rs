//! External collaborators the saga calls out to, with in-memory implementations.

pub mod inventory;
pub mod payment;

pub use inventory::{InMemoryStockService, ReservationResult, StockService};
pub use payment::{ChargeRequest, ChargeResult, InMemoryPaymentGateway, PaymentGateway};
