//! Event log contract for the order-fulfillment saga.
//!
//! The log is durable, ordered per key, at-least-once and replayable. The
//! saga only depends on the [`EventLog`] trait; [`InMemoryEventLog`] provides
//! the same delivery contract in-process.

pub mod error;
pub mod log;
pub mod memory;
pub mod record;
pub mod topics;

pub use common::{EventId, OrderId};
pub use error::{EventLogError, Result};
pub use log::{EventLog, EventLogExt, partition_for};
pub use memory::InMemoryEventLog;
pub use record::{Delivery, LogRecord, LogRecordBuilder, Offset};
pub use topics::{dead_letter_topic, is_dead_letter_topic};
