//! Postgres stores.
//!
//! Stock mutation runs in a single transaction: the affected variant rows
//! are locked with `SELECT … FOR UPDATE` in a stable product order, the
//! availability check (for confirmations) reads the locked counters, and the
//! clamped updates follow. Concurrent confirmations touching the same
//! variant serialize on the row locks instead of racing a read-then-write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::order::{LineItem, Order, OrderStatus, StatusHistoryEntry};
use crate::domain::product::{Product, Variant};
use crate::stock::{check_availability, Counters, ProductStock, StockDeltas};
use crate::{CommerceError, Result};

use super::{OrderStore, ProductStore};

#[derive(Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    base_price: i64,
    currency: String,
    collection_id: Option<Uuid>,
    image_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    product_id: Uuid,
    label: String,
    price: i64,
    stock: i32,
    sold: i32,
}

fn assemble(rows: Vec<ProductRow>, variants: Vec<VariantRow>) -> HashMap<Uuid, Product> {
    let mut by_product: HashMap<Uuid, Vec<Variant>> = HashMap::new();
    for v in variants {
        by_product.entry(v.product_id).or_default().push(Variant {
            label: v.label,
            price: v.price,
            stock: v.stock,
            sold: v.sold,
        });
    }
    rows.into_iter()
        .map(|r| {
            let variants = by_product.remove(&r.id).unwrap_or_default();
            (
                r.id,
                Product {
                    id: r.id,
                    name: r.name,
                    description: r.description,
                    base_price: r.base_price,
                    currency: r.currency,
                    collection_id: r.collection_id,
                    image_url: r.image_url,
                    status: r.status,
                    variants,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                },
            )
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    product_id: Uuid,
    product_name: String,
    label: String,
    stock: i32,
    sold: i32,
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn get(&self, id: Uuid) -> Result<Product> {
        let mut products = self.fetch_many(&[id]).await?;
        products.remove(&id).ok_or(CommerceError::ProductNotFound(id))
    }

    async fn fetch_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(
            "SELECT id, name, description, base_price, currency, collection_id, image_url, status, created_at, updated_at \
             FROM products WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        let variants: Vec<VariantRow> = sqlx::query_as(
            "SELECT product_id, label, price, stock, sold FROM product_variants \
             WHERE product_id = ANY($1) ORDER BY product_id, position",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(assemble(rows, variants))
    }

    async fn commit_stock_deltas(
        &self,
        deltas: &StockDeltas,
        check: Option<&[LineItem]>,
    ) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let ids = deltas.product_ids();
        let mut tx = self.pool.begin().await?;

        let rows: Vec<LedgerRow> = sqlx::query_as(
            "SELECT p.id AS product_id, p.name AS product_name, v.label, v.stock, v.sold \
             FROM products p JOIN product_variants v ON v.product_id = p.id \
             WHERE p.id = ANY($1) ORDER BY p.id, v.label FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut ledgers: HashMap<Uuid, ProductStock> = HashMap::new();
        for row in rows {
            ledgers
                .entry(row.product_id)
                .or_insert_with(|| ProductStock {
                    product_id: row.product_id,
                    product_name: row.product_name.clone(),
                    variants: Default::default(),
                })
                .variants
                .insert(row.label, Counters { stock: row.stock, sold: row.sold });
        }
        for id in &ids {
            if !ledgers.contains_key(id) {
                return Err(CommerceError::ProductNotFound(*id));
            }
        }

        if let Some(items) = check {
            let report = check_availability(items, &ledgers)?;
            if !report.all_sufficient {
                return Err(CommerceError::InsufficientStock(report.shortfalls()));
            }
        }

        for (product_id, per_variant) in deltas.iter() {
            for (label, delta) in per_variant {
                let updated = sqlx::query(
                    "UPDATE product_variants \
                     SET stock = GREATEST(0, stock - $3), sold = GREATEST(0, sold + $3) \
                     WHERE product_id = $1 AND label = $2",
                )
                .bind(product_id)
                .bind(label)
                .bind(delta)
                .execute(&mut *tx)
                .await?;
                if updated.rows_affected() == 0 {
                    tracing::warn!(product = %product_id, %label, "stock delta for undeclared variant ignored");
                }
            }
        }
        sqlx::query("UPDATE products SET updated_at = NOW() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn items_for(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<LineItem>>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT order_id, product_id, product_name, variant, quantity, unit_price \
             FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;
        let mut items: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
        for row in rows {
            items.entry(row.order_id).or_default().push(LineItem {
                product_id: row.product_id,
                product_name: row.product_name,
                variant: row.variant,
                quantity: row.quantity,
                unit_price: row.unit_price,
            });
        }
        Ok(items)
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    status: String,
    total_amount: i64,
    currency: String,
    customer_info: serde_json::Value,
    shipping_address: serde_json::Value,
    status_history: Json<Vec<StatusHistoryEntry>>,
    admin_notes: Option<String>,
    stock_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    variant: String,
    quantity: i32,
    unit_price: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<LineItem>) -> Result<Order> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            status: self.status.parse()?,
            items,
            total_amount: self.total_amount,
            currency: self.currency,
            customer_info: self.customer_info,
            shipping_address: self.shipping_address,
            status_history: self.status_history.0,
            admin_notes: self.admin_notes,
            stock_updated_at: self.stock_updated_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, order_number, status, total_amount, currency, customer_info, \
                             shipping_address, status_history, admin_notes, stock_updated_at, \
                             created_at, updated_at";

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO orders (id, order_number, status, total_amount, currency, customer_info, \
             shipping_address, status_history, admin_notes, stock_updated_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(&order.customer_info)
        .bind(&order.shipping_address)
        .bind(Json(&order.status_history))
        .bind(&order.admin_notes)
        .bind(order.stock_updated_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(CommerceError::Conflict(format!(
                    "order number already exists: {}",
                    order.order_number
                )));
            }
            Err(e) => return Err(e.into()),
        }
        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (order_id, position, product_id, product_name, variant, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(&item.variant)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Order> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let row = row.ok_or(CommerceError::OrderNotFound)?;
        let mut items = self.items_for(&[id]).await?;
        row.into_order(items.remove(&id).unwrap_or_default())
    }

    async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = match status {
            Some(s) => {
                sqlx::query_as(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $3 \
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .bind(s.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders \
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = self.items_for(&ids).await?;
        rows.into_iter()
            .map(|r| {
                let order_items = items.remove(&r.id).unwrap_or_default();
                r.into_order(order_items)
            })
            .collect()
    }

    async fn count(&self, status: Option<OrderStatus>) -> Result<i64> {
        let total: (i64,) = match status {
            Some(s) => {
                sqlx::query_as("SELECT COUNT(*) FROM orders WHERE status = $1")
                    .bind(s.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM orders")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(total.0)
    }

    async fn record_transition(&self, order: &Order, expected: OrderStatus) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE orders SET status = $2, status_history = $3, admin_notes = $4, \
             stock_updated_at = $5, updated_at = $6 WHERE id = $1 AND status = $7",
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(Json(&order.status_history))
        .bind(&order.admin_notes)
        .bind(order.stock_updated_at)
        .bind(order.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            let found: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE id = $1")
                .bind(order.id)
                .fetch_one(&self.pool)
                .await?;
            return Err(if found.0 == 0 {
                CommerceError::OrderNotFound
            } else {
                CommerceError::Conflict("concurrent status update".to_string())
            });
        }
        Ok(())
    }
}
