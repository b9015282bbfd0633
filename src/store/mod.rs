//! Persistence boundaries for the order/inventory core.
//!
//! Two implementations: Postgres for the service, in-memory for tests and
//! local development. Stock mutation is a single atomic operation on the
//! store so concurrent confirmations of the same variant are serialized by
//! the storage layer, not the application.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{LineItem, Order, OrderStatus};
use crate::domain::product::Product;
use crate::stock::StockDeltas;
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryOrderStore, MemoryProductStore};
pub use postgres::{PgOrderStore, PgProductStore};

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Fails with `ProductNotFound` for an unknown id.
    async fn get(&self, id: Uuid) -> Result<Product>;

    /// Fetch several products; ids absent from the store are simply missing
    /// from the result map.
    async fn fetch_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>>;

    /// Apply a delta batch as one atomic unit: either every (product,
    /// variant) update lands or none does. Stock and sold are clamped at
    /// zero. A delta referencing an unknown product fails the whole batch
    /// with `ProductNotFound`.
    ///
    /// When `check` lines are supplied, current stock is validated against
    /// them inside the same atomic scope; any shortfall fails the batch with
    /// `InsufficientStock` before anything is written.
    async fn commit_stock_deltas(
        &self,
        deltas: &StockDeltas,
        check: Option<&[LineItem]>,
    ) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order. Fails with `Conflict` when the order number is
    /// already taken; callers regenerate and retry.
    async fn create(&self, order: &Order) -> Result<()>;

    /// Fails with `OrderNotFound` for an unknown id.
    async fn get(&self, id: Uuid) -> Result<Order>;

    /// Most recent first, optionally filtered by status.
    async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>>;

    async fn count(&self, status: Option<OrderStatus>) -> Result<i64>;

    /// Persist the mutable outcome of a status transition: status, history,
    /// admin notes and the stock marker. Compare-and-swap on the stored
    /// status: the write only lands when it still equals `expected`, so of
    /// two racing transitions exactly one wins. A lost race fails with
    /// `Conflict`; an unknown id with `OrderNotFound`.
    async fn record_transition(&self, order: &Order, expected: OrderStatus) -> Result<()>;
}

#[async_trait]
impl<S> ProductStore for std::sync::Arc<S>
where
    S: ProductStore + ?Sized,
{
    async fn get(&self, id: Uuid) -> Result<Product> {
        (**self).get(id).await
    }

    async fn fetch_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>> {
        (**self).fetch_many(ids).await
    }

    async fn commit_stock_deltas(
        &self,
        deltas: &StockDeltas,
        check: Option<&[LineItem]>,
    ) -> Result<()> {
        (**self).commit_stock_deltas(deltas, check).await
    }
}

#[async_trait]
impl<S> OrderStore for std::sync::Arc<S>
where
    S: OrderStore + ?Sized,
{
    async fn create(&self, order: &Order) -> Result<()> {
        (**self).create(order).await
    }

    async fn get(&self, id: Uuid) -> Result<Order> {
        (**self).get(id).await
    }

    async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        (**self).list(status, limit, offset).await
    }

    async fn count(&self, status: Option<OrderStatus>) -> Result<i64> {
        (**self).count(status).await
    }

    async fn record_transition(&self, order: &Order, expected: OrderStatus) -> Result<()> {
        (**self).record_transition(order, expected).await
    }
}
