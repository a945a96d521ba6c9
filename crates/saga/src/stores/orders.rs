//! Order repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{Aggregate, Order, OrderState, SagaEvent};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Trait for order persistence.
///
/// Orders only ever move forward through their state machine: events are
/// applied through [`Aggregate::apply`], which ignores transitions the
/// current state does not allow.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order. Returns false if the id is already taken.
    async fn insert(&self, order: Order) -> Result<bool>;

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Applies an event to a stored order and returns the result.
    ///
    /// A `CheckoutRequested` event for an unknown id creates the order.
    async fn apply_event(&self, event: &SagaEvent) -> Result<Order>;

    /// Returns every order in `state`.
    async fn list_by_state(&self, state: OrderState) -> Result<Vec<Order>>;

    /// Returns a user's orders, newest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;
}

#[derive(Debug, Default)]
struct RepositoryState {
    orders: HashMap<OrderId, Order>,
    fail_next_writes: u32,
}

/// In-memory order repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<RepositoryState>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` writes as if the database were unreachable.
    pub async fn fail_next_writes(&self, count: u32) {
        self.state.write().await.fail_next_writes = count;
    }

    /// Returns the number of stored orders.
    pub async fn count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    fn check_write(state: &mut RepositoryState) -> Result<()> {
        if state.fail_next_writes > 0 {
            state.fail_next_writes -= 1;
            return Err(SagaError::TransientInfra(
                "order store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: Order) -> Result<bool> {
        let mut state = self.state.write().await;
        Self::check_write(&mut state)?;

        let Some(order_id) = order.id() else {
            return Err(SagaError::Validation(
                "cannot store an order without an id".to_string(),
            ));
        };
        if state.orders.contains_key(&order_id) {
            return Ok(false);
        }
        state.orders.insert(order_id, order);
        Ok(true)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn apply_event(&self, event: &SagaEvent) -> Result<Order> {
        let mut state = self.state.write().await;
        Self::check_write(&mut state)?;

        let order_id = event.order_id();
        if !state.orders.contains_key(&order_id)
            && !matches!(event, SagaEvent::CheckoutRequested(_))
        {
            return Err(SagaError::OrderNotFound(order_id));
        }

        let order = state.orders.entry(order_id).or_default();
        order.apply(event.clone());
        Ok(order.clone())
    }

    async fn list_by_state(&self, order_state: OrderState) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.state() == order_state)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at());
        Ok(orders)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id() == Some(user_id))
            .cloned()
            .collect();
        orders.sort_by_key(|o| std::cmp::Reverse(o.created_at()));
        Ok(orders)
    }
}
