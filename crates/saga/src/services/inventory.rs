//! Stock service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::{LineItem, ProductId};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Result of a stock reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationResult {
    /// Every item is held for the order.
    Reserved,

    /// Nothing was reserved because one item is short.
    Insufficient {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },
}

/// Trait for stock management operations.
///
/// All operations are keyed by order and idempotent: reserving twice holds
/// stock once, and releasing or committing an order without a reservation
/// does nothing.
#[async_trait]
pub trait StockService: Send + Sync {
    /// Holds stock for the order's items.
    async fn reserve_stock(&self, order_id: OrderId, items: &[LineItem])
    -> Result<ReservationResult>;

    /// Returns held stock to the shelf.
    async fn release_stock(&self, order_id: OrderId, items: &[LineItem]) -> Result<()>;

    /// Turns the reservation into a sale.
    async fn commit_stock(&self, order_id: OrderId, items: &[LineItem]) -> Result<()>;
}

#[derive(Debug, Default)]
struct StockState {
    /// Products without an entry are unlimited.
    levels: HashMap<ProductId, u32>,
    reservations: HashMap<OrderId, Vec<(ProductId, u32)>>,
    releases: HashMap<OrderId, u32>,
    commits: HashMap<OrderId, u32>,
    reserve_calls: u32,
    fail_next: u32,
}

/// In-memory stock service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockService {
    state: Arc<RwLock<StockState>>,
}

impl InMemoryStockService {
    /// Creates a service where every product is unlimited.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the available quantity of a product.
    pub async fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.state
            .write()
            .await
            .levels
            .insert(product_id.into(), quantity);
    }

    /// Fails the next `count` calls as if the service were unreachable.
    pub async fn fail_next_calls(&self, count: u32) {
        self.state.write().await.fail_next = count;
    }

    /// Returns the available quantity of a stocked product.
    pub async fn available(&self, product_id: &ProductId) -> Option<u32> {
        self.state.read().await.levels.get(product_id).copied()
    }

    /// Returns true if stock is currently held for the order.
    pub async fn is_reserved(&self, order_id: OrderId) -> bool {
        self.state.read().await.reservations.contains_key(&order_id)
    }

    /// Returns how many times a reservation of the order was released.
    pub async fn release_count(&self, order_id: OrderId) -> u32 {
        self.state
            .read()
            .await
            .releases
            .get(&order_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns how many times a reservation of the order was committed.
    pub async fn commit_count(&self, order_id: OrderId) -> u32 {
        self.state
            .read()
            .await
            .commits
            .get(&order_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of reserve calls, repeated ones included.
    pub async fn reserve_calls(&self) -> u32 {
        self.state.read().await.reserve_calls
    }

    fn check_available(state: &mut StockState) -> Result<()> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SagaError::TransientInfra(
                "stock service unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StockService for InMemoryStockService {
    async fn reserve_stock(
        &self,
        order_id: OrderId,
        items: &[LineItem],
    ) -> Result<ReservationResult> {
        let mut state = self.state.write().await;
        state.reserve_calls += 1;
        Self::check_available(&mut state)?;

        if state.reservations.contains_key(&order_id) {
            return Ok(ReservationResult::Reserved);
        }

        // Saturates: a tally past u32::MAX exceeds any stock level anyway.
        let mut wanted: HashMap<&ProductId, u32> = HashMap::new();
        for item in items {
            let tally = wanted.entry(&item.product_id).or_default();
            *tally = tally.saturating_add(item.quantity);
        }

        for item in items {
            let requested = wanted[&item.product_id];
            if let Some(&available) = state.levels.get(&item.product_id)
                && available < requested
            {
                return Ok(ReservationResult::Insufficient {
                    product_id: item.product_id.clone(),
                    requested,
                    available,
                });
            }
        }

        let mut held = Vec::with_capacity(wanted.len());
        for (product_id, quantity) in wanted {
            if let Some(level) = state.levels.get_mut(product_id) {
                *level -= quantity;
            }
            held.push((product_id.clone(), quantity));
        }
        state.reservations.insert(order_id, held);

        Ok(ReservationResult::Reserved)
    }

    async fn release_stock(&self, order_id: OrderId, _items: &[LineItem]) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_available(&mut state)?;

        let Some(held) = state.reservations.remove(&order_id) else {
            return Ok(());
        };
        for (product_id, quantity) in held {
            if let Some(level) = state.levels.get_mut(&product_id) {
                *level = level.saturating_add(quantity);
            }
        }
        *state.releases.entry(order_id).or_default() += 1;

        Ok(())
    }

    async fn commit_stock(&self, order_id: OrderId, _items: &[LineItem]) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_available(&mut state)?;

        if state.reservations.remove(&order_id).is_some() {
            *state.commits.entry(order_id).or_default() += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;

    fn items() -> Vec<LineItem> {
        vec![LineItem::new("SKU-001", "Widget", 2, Money::from_cents(1999))]
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let service = InMemoryStockService::new();
        service.set_stock("SKU-001", 5).await;
        let order_id = OrderId::new();

        let result = service.reserve_stock(order_id, &items()).await.unwrap();
        assert_eq!(result, ReservationResult::Reserved);
        assert_eq!(service.available(&ProductId::new("SKU-001")).await, Some(3));

        service.release_stock(order_id, &items()).await.unwrap();
        service.release_stock(order_id, &items()).await.unwrap();
        assert_eq!(service.available(&ProductId::new("SKU-001")).await, Some(5));
        assert_eq!(service.release_count(order_id).await, 1);
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_order() {
        let service = InMemoryStockService::new();
        service.set_stock("SKU-001", 5).await;
        let order_id = OrderId::new();

        service.reserve_stock(order_id, &items()).await.unwrap();
        service.reserve_stock(order_id, &items()).await.unwrap();

        assert_eq!(service.available(&ProductId::new("SKU-001")).await, Some(3));
        assert_eq!(service.reserve_calls().await, 2);
    }

    #[tokio::test]
    async fn test_insufficient_stock_reserves_nothing() {
        let service = InMemoryStockService::new();
        service.set_stock("SKU-001", 1).await;
        let order_id = OrderId::new();

        let result = service.reserve_stock(order_id, &items()).await.unwrap();
        assert_eq!(
            result,
            ReservationResult::Insufficient {
                product_id: ProductId::new("SKU-001"),
                requested: 2,
                available: 1,
            }
        );
        assert!(!service.is_reserved(order_id).await);
        assert_eq!(service.available(&ProductId::new("SKU-001")).await, Some(1));
    }

    #[tokio::test]
    async fn test_commit_keeps_stock_sold() {
        let service = InMemoryStockService::new();
        service.set_stock("SKU-001", 5).await;
        let order_id = OrderId::new();

        service.reserve_stock(order_id, &items()).await.unwrap();
        service.commit_stock(order_id, &items()).await.unwrap();
        service.release_stock(order_id, &items()).await.unwrap();

        assert_eq!(service.available(&ProductId::new("SKU-001")).await, Some(3));
        assert_eq!(service.commit_count(order_id).await, 1);
        assert_eq!(service.release_count(order_id).await, 0);
    }

    #[tokio::test]
    async fn test_repeated_product_tally_saturates() {
        let service = InMemoryStockService::new();
        service.set_stock("SKU-001", u32::MAX - 1).await;
        let order_id = OrderId::new();
        let items = vec![
            LineItem::new("SKU-001", "Widget", u32::MAX, Money::zero()),
            LineItem::new("SKU-001", "Widget", u32::MAX, Money::zero()),
        ];

        let result = service.reserve_stock(order_id, &items).await.unwrap();
        assert_eq!(
            result,
            ReservationResult::Insufficient {
                product_id: ProductId::new("SKU-001"),
                requested: u32::MAX,
                available: u32::MAX - 1,
            }
        );

        let unlimited = InMemoryStockService::new();
        let result = unlimited.reserve_stock(order_id, &items).await.unwrap();
        assert_eq!(result, ReservationResult::Reserved);
    }
}
