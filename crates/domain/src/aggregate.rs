//! Core aggregate and domain event traits.

use common::OrderId;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is the `event_type` of the log record carrying the event.
    fn event_type(&self) -> &'static str;
}

/// Trait for state that can be rebuilt by replaying events.
///
/// The event log is the source of truth; an aggregate is a fold over the
/// events concerning one entity.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate consumes.
    type Event: DomainEvent;

    /// Returns the aggregate's unique identifier.
    ///
    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<OrderId>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure, deterministic and idempotent: the log
    /// delivers at least once, so applying an event twice must leave the
    /// aggregate as applying it once did. Events that would violate the
    /// state machine are ignored.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Rebuilds an aggregate from its events.
    fn from_events(events: impl IntoIterator<Item = Self::Event>) -> Self {
        let mut aggregate = Self::default();
        aggregate.apply_events(events);
        aggregate
    }
}
