//! In-memory stores. Used by the test suite and handy for local
//! experiments; a `Mutex` around each map plays the role the database
//! transaction plays in the Postgres stores.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{LineItem, Order, OrderStatus};
use crate::domain::product::Product;
use crate::stock::{apply_delta, check_availability, Counters, ProductStock, StockDeltas};
use crate::{CommerceError, Result};

use super::{OrderStore, ProductStore};

#[derive(Default)]
pub struct MemoryProductStore {
    products: Mutex<HashMap<Uuid, Product>>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        self.products.lock().unwrap().insert(product.id, product);
    }

    pub fn remove(&self, id: Uuid) -> Option<Product> {
        self.products.lock().unwrap().remove(&id)
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn get(&self, id: Uuid) -> Result<Product> {
        self.products
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CommerceError::ProductNotFound(id))
    }

    async fn fetch_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>> {
        let products = self.products.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn commit_stock_deltas(
        &self,
        deltas: &StockDeltas,
        check: Option<&[LineItem]>,
    ) -> Result<()> {
        let mut products = self.products.lock().unwrap();

        // Validate the whole batch before touching anything.
        let mut ledgers: HashMap<Uuid, ProductStock> = HashMap::new();
        for (product_id, _) in deltas.iter() {
            let product = products
                .get(product_id)
                .ok_or(CommerceError::ProductNotFound(*product_id))?;
            ledgers.insert(*product_id, ProductStock::from(product));
        }
        if let Some(items) = check {
            let report = check_availability(items, &ledgers)?;
            if !report.all_sufficient {
                return Err(CommerceError::InsufficientStock(report.shortfalls()));
            }
        }

        for (product_id, per_variant) in deltas.iter() {
            let product = products.get_mut(product_id).expect("validated above");
            for (label, delta) in per_variant {
                match product.variants.iter_mut().find(|v| v.label == *label) {
                    Some(v) => {
                        let next = apply_delta(Counters { stock: v.stock, sold: v.sold }, *delta);
                        v.stock = next.stock;
                        v.sold = next.sold;
                    }
                    None => {
                        tracing::warn!(product = %product_id, %label, "stock delta for undeclared variant ignored");
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.lock().unwrap();
        if orders.values().any(|o| o.order_number == order.order_number) {
            return Err(CommerceError::Conflict(format!(
                "order number already exists: {}",
                order.order_number
            )));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Order> {
        self.orders
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CommerceError::OrderNotFound)
    }

    async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let orders = self.orders.lock().unwrap();
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, status: Option<OrderStatus>) -> Result<i64> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .count() as i64)
    }

    async fn record_transition(&self, order: &Order, expected: OrderStatus) -> Result<()> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&order.id) {
            Some(existing) if existing.status == expected => {
                *existing = order.clone();
                Ok(())
            }
            Some(_) => Err(CommerceError::Conflict("concurrent status update".to_string())),
            None => Err(CommerceError::OrderNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::product::Variant;

    fn product(stock: i32, sold: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Bois Fumé".to_string(),
            description: None,
            base_price: 9_500,
            currency: "USD".to_string(),
            collection_id: None,
            image_url: None,
            status: "active".to_string(),
            variants: vec![Variant {
                label: "50ml".to_string(),
                price: 9_500,
                stock,
                sold,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(product: &Product, qty: i32) -> LineItem {
        LineItem {
            product_id: product.id,
            product_name: product.name.clone(),
            variant: "50ml".to_string(),
            quantity: qty,
            unit_price: 9_500,
        }
    }

    #[tokio::test]
    async fn delta_batch_is_all_or_nothing() {
        let store = MemoryProductStore::new();
        let p1 = product(10, 0);
        let p2 = product(10, 0);
        store.insert(p1.clone());
        // p2 never inserted: the batch references a missing product.

        let items = [line(&p1, 2), line(&p2, 2)];
        let deltas = StockDeltas::for_confirmation(&items);
        let err = store.commit_stock_deltas(&deltas, None).await.unwrap_err();
        assert!(matches!(err, CommerceError::ProductNotFound(id) if id == p2.id));

        let untouched = store.get(p1.id).await.unwrap();
        assert_eq!(untouched.variant("50ml").unwrap().stock, 10);
    }

    #[tokio::test]
    async fn restoration_clamps_counters_at_zero() {
        let store = MemoryProductStore::new();
        let p = product(2, 1);
        store.insert(p.clone());

        // Over-cancellation: restore more than was ever sold.
        let items = [line(&p, 4)];
        let deltas = StockDeltas::for_restoration(&items);
        store.commit_stock_deltas(&deltas, None).await.unwrap();

        let after = store.get(p.id).await.unwrap();
        let v = after.variant("50ml").unwrap();
        assert_eq!(v.stock, 6);
        assert_eq!(v.sold, 0);
    }

    #[tokio::test]
    async fn duplicate_order_number_conflicts() {
        let store = MemoryOrderStore::new();
        let order = crate::domain::order::Order::new(
            vec![],
            "USD".to_string(),
            serde_json::json!({}),
            serde_json::json!({}),
        );
        store.create(&order).await.unwrap();

        let mut duplicate = order.clone();
        duplicate.id = Uuid::new_v4();
        let err = store.create(&duplicate).await.unwrap_err();
        assert!(matches!(err, CommerceError::Conflict(_)));
    }

    #[tokio::test]
    async fn stale_transition_swap_is_rejected() {
        let store = MemoryOrderStore::new();
        let order = crate::domain::order::Order::new(
            vec![],
            "USD".to_string(),
            serde_json::json!({}),
            serde_json::json!({}),
        );
        store.create(&order).await.unwrap();

        let mut confirmed = order.clone();
        confirmed.status = OrderStatus::Confirmed;
        store.record_transition(&confirmed, OrderStatus::Pending).await.unwrap();

        // Second writer still believes the order is pending.
        let err = store
            .record_transition(&confirmed, OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::Conflict(_)));
        assert_eq!(store.get(order.id).await.unwrap().status, OrderStatus::Confirmed);
    }
}
