//! Notification fan-out.
//!
//! Pushes order transitions to the owning user's live connections. Delivery
//! is best effort: nothing is persisted, a full or closed connection loses
//! the event, and a user who connects later sees no backlog.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use common::{EventId, UserId};
use domain::{DomainEvent, SagaEvent};
use futures_core::Stream;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

/// How many delivered event ids are remembered for duplicate suppression.
const RECENT_EVENTS: usize = 1024;

/// An event pushed to a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event_id: EventId,
    pub event: SagaEvent,
}

impl Notification {
    pub fn new(event_id: EventId, event: SagaEvent) -> Self {
        Self { event_id, event }
    }

    /// Returns the event type, e.g. "OrderConfirmed".
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// Collaborator interface for pushing events to users.
///
/// `push` must never block the caller.
pub trait NotificationTransport: Send + Sync {
    /// Pushes a notification to every live connection of `user_id`.
    ///
    /// Returns the number of connections that accepted it.
    fn push(&self, user_id: UserId, notification: Notification) -> usize;
}

#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<UserId, Vec<(u64, mpsc::Sender<Notification>)>>,
    next_connection: u64,
    recent: VecDeque<EventId>,
    recent_set: HashSet<EventId>,
}

impl HubState {
    /// Records an event id. Returns false if it was seen recently.
    fn remember(&mut self, event_id: EventId) -> bool {
        if !self.recent_set.insert(event_id) {
            return false;
        }
        self.recent.push_back(event_id);
        if self.recent.len() > RECENT_EVENTS
            && let Some(oldest) = self.recent.pop_front()
        {
            self.recent_set.remove(&oldest);
        }
        true
    }
}

/// In-process registry of live user connections.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    state: Arc<Mutex<HubState>>,
    capacity: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationHub {
    /// Creates a hub whose connections buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Opens a connection for `user_id`.
    ///
    /// Only events published after this call are delivered. Dropping the
    /// subscription closes the connection.
    pub fn subscribe(&self, user_id: UserId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut state = self.lock();
        let connection = state.next_connection;
        state.next_connection += 1;
        state
            .connections
            .entry(user_id)
            .or_default()
            .push((connection, tx));

        tracing::debug!(%user_id, connection, "Notification subscriber connected");

        Subscription {
            rx,
            user_id,
            connection,
            state: Arc::clone(&self.state),
        }
    }

    /// Routes an event to its owner's connections.
    pub fn publish(&self, event_id: EventId, event: &SagaEvent) -> usize {
        self.push(event.user_id(), Notification::new(event_id, event.clone()))
    }

    /// Returns the number of live connections of a user.
    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.lock()
            .connections
            .get(&user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationTransport for NotificationHub {
    fn push(&self, user_id: UserId, notification: Notification) -> usize {
        let mut state = self.lock();
        if !state.remember(notification.event_id) {
            tracing::trace!(event_id = %notification.event_id, "Suppressed repeated notification");
            return 0;
        }

        let Some(connections) = state.connections.get_mut(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        connections.retain(|(connection, tx)| match tx.try_send(notification.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("notifications_dropped_total", "reason" => "full").increment(1);
                tracing::debug!(%user_id, connection, "Notification dropped: connection full");
                true
            }
            Err(TrySendError::Closed(_)) => {
                metrics::counter!("notifications_dropped_total", "reason" => "closed")
                    .increment(1);
                false
            }
        });
        if connections.is_empty() {
            state.connections.remove(&user_id);
        }

        metrics::counter!("notifications_delivered_total").increment(delivered as u64);
        delivered
    }
}

/// One live connection of a user.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
    user_id: UserId,
    connection: u64,
    state: Arc<Mutex<HubState>>,
}

impl Subscription {
    /// Waits for the next notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Returns a buffered notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connections) = state.connections.get_mut(&self.user_id) {
            connections.retain(|(connection, _)| *connection != self.connection);
            if connections.is_empty() {
                state.connections.remove(&self.user_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use domain::FailureKind;

    fn event(user_id: UserId) -> SagaEvent {
        SagaEvent::order_failed(OrderId::new(), user_id, FailureKind::OutOfStock, "none left")
    }

    #[tokio::test]
    async fn test_routes_to_owner_only() {
        let hub = NotificationHub::new(8);
        let alice = UserId::new();
        let bob = UserId::new();
        let mut a = hub.subscribe(alice);
        let mut b = hub.subscribe(bob);

        assert_eq!(hub.publish(EventId::new(), &event(alice)), 1);

        assert_eq!(a.recv().await.unwrap().event_type(), "OrderFailed");
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_every_connection_of_a_user_receives() {
        let hub = NotificationHub::new(8);
        let user = UserId::new();
        let mut first = hub.subscribe(user);
        let mut second = hub.subscribe(user);

        assert_eq!(hub.publish(EventId::new(), &event(user)), 2);
        assert!(first.try_recv().is_some());
        assert!(second.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_full_connection_drops_without_blocking() {
        let hub = NotificationHub::new(1);
        let user = UserId::new();
        let mut sub = hub.subscribe(user);

        assert_eq!(hub.publish(EventId::new(), &event(user)), 1);
        assert_eq!(hub.publish(EventId::new(), &event(user)), 0);

        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
        assert_eq!(hub.subscriber_count(user), 1);
    }

    #[tokio::test]
    async fn test_repeated_event_is_pushed_once() {
        let hub = NotificationHub::new(8);
        let user = UserId::new();
        let mut sub = hub.subscribe(user);
        let id = EventId::new();
        let e = event(user);

        hub.publish(id, &e);
        hub.publish(id, &e);

        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_subscribers() {
        let hub = NotificationHub::new(8);
        let user = UserId::new();
        hub.publish(EventId::new(), &event(user));

        let mut sub = hub.subscribe(user);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = NotificationHub::new(8);
        let user = UserId::new();
        let sub = hub.subscribe(user);
        assert_eq!(hub.subscriber_count(user), 1);

        drop(sub);
        assert_eq!(hub.subscriber_count(user), 0);
        assert_eq!(hub.publish(EventId::new(), &event(user)), 0);
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        use futures_util::StreamExt;

        let hub = NotificationHub::new(8);
        let user = UserId::new();
        let mut sub = hub.subscribe(user);
        hub.publish(EventId::new(), &event(user));

        let notification = sub.next().await.unwrap();
        assert_eq!(notification.event.user_id(), user);
    }
}
