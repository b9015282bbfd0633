//! Order lifecycle service: checkout and status transitions with their
//! inventory side effects.
//!
//! Confirmation checks availability and decrements stock; cancellation of a
//! confirmed order restores it. Both mutations run through the product
//! store's atomic delta commit, so an order spanning several products either
//! lands completely or not at all.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::order::{generate_order_number, LineItem, Order, OrderStatus, StatusHistoryEntry};
use crate::stock::StockDeltas;
use crate::store::{OrderStore, ProductStore};
use crate::{CommerceError, Result};

/// Attempts before giving up on a colliding order number.
const ORDER_NUMBER_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub variant: String,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CheckoutOrder {
    pub lines: Vec<CheckoutLine>,
    pub customer_info: serde_json::Value,
    pub shipping_address: serde_json::Value,
}

#[derive(Clone)]
pub struct OrderService<P, O> {
    products: P,
    orders: O,
}

impl<P: ProductStore, O: OrderStore> OrderService<P, O> {
    pub fn new(products: P, orders: O) -> Self {
        Self { products, orders }
    }

    /// Create a pending order from validated cart lines. Prices and product
    /// names are captured here; the total never gets recomputed afterwards.
    pub async fn checkout(&self, request: CheckoutOrder) -> Result<Order> {
        if request.lines.is_empty() {
            return Err(CommerceError::Validation("order has no items".to_string()));
        }
        for line in &request.lines {
            if line.quantity <= 0 {
                return Err(CommerceError::Validation("quantity must be positive".to_string()));
            }
        }

        let mut ids: Vec<Uuid> = request.lines.iter().map(|l| l.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let products = self.products.fetch_many(&ids).await?;

        let mut items = Vec::with_capacity(request.lines.len());
        let mut currency = None;
        for line in &request.lines {
            let product = products
                .get(&line.product_id)
                .ok_or(CommerceError::ProductNotFound(line.product_id))?;
            if !product.is_active() {
                return Err(CommerceError::Validation(format!(
                    "product is not available: {}",
                    product.name
                )));
            }
            let variant = product.variant(&line.variant).ok_or_else(|| {
                CommerceError::Validation(format!(
                    "unknown variant {} for product {}",
                    line.variant, product.name
                ))
            })?;
            currency.get_or_insert_with(|| product.currency.clone());
            items.push(LineItem {
                product_id: product.id,
                product_name: product.name.clone(),
                variant: variant.label.clone(),
                quantity: line.quantity,
                unit_price: variant.price,
            });
        }

        let mut order = Order::new(
            items,
            currency.unwrap_or_else(|| "USD".to_string()),
            request.customer_info,
            request.shipping_address,
        );
        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            match self.orders.create(&order).await {
                Ok(()) => {
                    tracing::info!(order = %order.order_number, total = order.total_amount, "order created");
                    return Ok(order);
                }
                Err(CommerceError::Conflict(_)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    order.order_number = generate_order_number();
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop returns on the last attempt")
    }

    /// State machine entry point. Validates the transition against the
    /// allow-list, runs the stock side effect for the confirm/cancel edges
    /// and appends exactly one history entry.
    ///
    /// The transition is claimed first with a compare-and-swap on the stored
    /// status, then the stock batch runs. Two racing calls both pass the
    /// allow-list on their stale reads, but only one wins the swap; the loser
    /// fails with `Conflict` before any stock is touched, so a confirmation
    /// can never decrement twice. If the stock batch fails after a won claim,
    /// the claim is rolled back to the pre-transition snapshot.
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        notes: Option<String>,
    ) -> Result<Order> {
        let snapshot = self.orders.get(order_id).await?;
        let previous = snapshot.status;
        if !previous.can_transition_to(new_status) {
            return Err(CommerceError::InvalidTransition { from: previous, to: new_status });
        }

        let now = Utc::now();
        let restores_stock = new_status == OrderStatus::Cancelled && snapshot.holds_stock();
        let mut order = snapshot.clone();
        order.status = new_status;
        order.status_history.push(StatusHistoryEntry {
            status: new_status,
            timestamp: now,
            notes: notes.clone(),
        });
        if notes.is_some() {
            order.admin_notes = notes;
        }
        order.updated_at = now;
        match new_status {
            OrderStatus::Confirmed => order.stock_updated_at = Some(now),
            OrderStatus::Cancelled if restores_stock => order.stock_updated_at = None,
            _ => {}
        }

        self.orders.record_transition(&order, previous).await?;

        let stock_result = match new_status {
            OrderStatus::Confirmed => {
                let deltas = StockDeltas::for_confirmation(&order.items);
                self.products
                    .commit_stock_deltas(&deltas, Some(&order.items))
                    .await
            }
            // Nothing to restore unless the order still holds a decrement.
            OrderStatus::Cancelled if restores_stock => {
                let deltas = StockDeltas::for_restoration(&order.items);
                self.products.commit_stock_deltas(&deltas, None).await
            }
            _ => Ok(()),
        };
        if let Err(e) = stock_result {
            if let Err(revert) = self.orders.record_transition(&snapshot, new_status).await {
                tracing::error!(
                    order = %order.order_number,
                    error = %revert,
                    "failed to roll back status claim after stock failure"
                );
            }
            return Err(e);
        }

        tracing::info!(order = %order.order_number, from = %previous, to = %new_status, "order status updated");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.get(order_id).await
    }

    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64)> {
        let orders = self.orders.list(status, limit, offset).await?;
        let total = self.orders.count(status).await?;
        Ok((orders, total))
    }
}
