use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, OrderId};

/// Position of a record within a topic partition.
///
/// Offsets start at 0 for the first record of a partition and increase by 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the next offset.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw offset value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The wire envelope of every event on the log.
///
/// Records are immutable once published. The order id is the partition key,
/// so all records concerning one order are delivered in publish order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The order this event concerns; also the partition key.
    pub order_id: OrderId,

    /// The type of the event (e.g., "OrderConfirmed").
    pub event_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// The event that caused this one, for tracing a saga end to end.
    pub causation_id: Option<EventId>,

    /// When the producer emitted the event.
    pub produced_at: DateTime<Utc>,
}

impl LogRecord {
    /// Creates a new record builder.
    pub fn builder() -> LogRecordBuilder {
        LogRecordBuilder::default()
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Builder for constructing log records.
#[derive(Debug, Default)]
pub struct LogRecordBuilder {
    event_id: Option<EventId>,
    order_id: Option<OrderId>,
    event_type: Option<String>,
    payload: Option<serde_json::Value>,
    causation_id: Option<EventId>,
    produced_at: Option<DateTime<Utc>>,
}

impl LogRecordBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the order ID (partition key).
    pub fn order_id(mut self, id: OrderId) -> Self {
        self.order_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the causing event.
    pub fn causation_id(mut self, id: Option<EventId>) -> Self {
        self.causation_id = id;
        self
    }

    /// Sets the production timestamp. If not set, the current time will be used.
    pub fn produced_at(mut self, produced_at: DateTime<Utc>) -> Self {
        self.produced_at = Some(produced_at);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the record.
    ///
    /// # Panics
    ///
    /// Panics if required fields (order_id, event_type, payload) are not set.
    pub fn build(self) -> LogRecord {
        LogRecord {
            event_id: self.event_id.unwrap_or_default(),
            order_id: self.order_id.expect("order_id is required"),
            event_type: self.event_type.expect("event_type is required"),
            payload: self.payload.expect("payload is required"),
            causation_id: self.causation_id,
            produced_at: self.produced_at.unwrap_or_else(Utc::now),
        }
    }

    /// Tries to build the record, returning None if required fields are missing.
    pub fn try_build(self) -> Option<LogRecord> {
        Some(LogRecord {
            event_id: self.event_id.unwrap_or_default(),
            order_id: self.order_id?,
            event_type: self.event_type?,
            payload: self.payload?,
            causation_id: self.causation_id,
            produced_at: self.produced_at.unwrap_or_else(Utc::now),
        })
    }
}

/// A record handed to a consumer group, together with its delivery metadata.
///
/// The same record may be delivered more than once; `attempt` counts
/// deliveries of this offset to this group.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivered record.
    pub record: LogRecord,

    /// Topic the record was read from.
    pub topic: String,

    /// Consumer group the record was delivered to.
    pub group: String,

    /// Partition within the topic.
    pub partition: u32,

    /// Offset within the partition.
    pub offset: Offset,

    /// Delivery attempt, starting at 1.
    pub attempt: u32,

    /// When this offset was first delivered to the group.
    pub first_delivered_at: DateTime<Utc>,
}
