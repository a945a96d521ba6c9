//! Idempotency store for the order-fulfillment saga.
//!
//! Every consumer claims `(consumer, dedup key)` before applying a side
//! effect. Claims are atomic compare-and-set operations: when two copies of
//! the same message are processed concurrently, exactly one of them wins.
//!
//! Completed claims carry a result summary and a published flag, which lets
//! a producer publish strictly after its result is committed and republish
//! anything a crash left unpublished.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use error::{IdempotencyError, Result};
pub use memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;
pub use record::{ClaimOutcome, ClaimStatus, IdempotencyConfig, IdempotencyRecord};
pub use store::IdempotencyStore;
