//! Invoice repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{InvoiceId, OrderId};
use domain::Invoice;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Trait for invoice persistence. At most one invoice exists per order.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Stores the invoice unless its order already has one.
    ///
    /// Returns false if an invoice for the order already existed.
    async fn insert_if_absent(&self, invoice: Invoice) -> Result<bool>;

    async fn get(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>>;

    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Invoice>>;

    async fn count(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
struct RepositoryState {
    by_order: HashMap<OrderId, Invoice>,
    fail_next_inserts: u32,
}

/// In-memory invoice repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInvoiceRepository {
    state: Arc<RwLock<RepositoryState>>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` inserts as if the database were unreachable.
    pub async fn fail_next_inserts(&self, count: u32) {
        self.state.write().await.fail_next_inserts = count;
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn insert_if_absent(&self, invoice: Invoice) -> Result<bool> {
        let mut state = self.state.write().await;

        if state.fail_next_inserts > 0 {
            state.fail_next_inserts -= 1;
            return Err(SagaError::TransientInfra(
                "invoice store unavailable".to_string(),
            ));
        }

        if state.by_order.contains_key(&invoice.order_id) {
            return Ok(false);
        }
        state.by_order.insert(invoice.order_id, invoice);
        Ok(true)
    }

    async fn get(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>> {
        Ok(self
            .state
            .read()
            .await
            .by_order
            .values()
            .find(|i| i.id == invoice_id)
            .cloned())
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Invoice>> {
        Ok(self.state.read().await.by_order.get(&order_id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.by_order.len())
    }
}
