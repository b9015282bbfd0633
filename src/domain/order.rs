//! Orders and their status lifecycle.
//!
//! Transitions follow an explicit allow-list: pending → confirmed →
//! processing → shipped → delivered, with cancellation reachable from any
//! non-terminal state. Confirmation and cancellation are the only edges with
//! stock side effects; `stock_updated_at` marks an order that currently holds
//! a stock decrement and is the sole guard against double-counting.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CommerceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Transition allow-list. Repeat confirmation is rejected here, which
    /// keeps a double stock decrement impossible regardless of caller
    /// behavior.
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Confirmed, Self::Processing)
                | (Self::Processing, Self::Shipped)
                | (Self::Shipped, Self::Delivered)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CommerceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CommerceError::Validation(format!("unknown order status: {other}"))),
        }
    }
}

/// One entry per transition, append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub variant: String,
    pub quantity: i32,
    /// Captured at checkout, in the smallest currency unit.
    pub unit_price: i64,
}

impl LineItem {
    pub fn subtotal(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    /// Fixed at creation time, never recomputed.
    pub total_amount: i64,
    pub currency: String,
    pub customer_info: serde_json::Value,
    pub shipping_address: serde_json::Value,
    pub status_history: Vec<StatusHistoryEntry>,
    pub admin_notes: Option<String>,
    /// Set iff stock was decremented for this order and not yet restored.
    pub stock_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        items: Vec<LineItem>,
        currency: String,
        customer_info: serde_json::Value,
        shipping_address: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let total_amount = items.iter().map(LineItem::subtotal).sum();
        Self {
            id: Uuid::now_v7(),
            order_number: generate_order_number(),
            status: OrderStatus::Pending,
            items,
            total_amount,
            currency,
            customer_info,
            shipping_address,
            status_history: vec![StatusHistoryEntry {
                status: OrderStatus::Pending,
                timestamp: now,
                notes: None,
            }],
            admin_notes: None,
            stock_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this order currently holds a stock decrement.
    pub fn holds_stock(&self) -> bool {
        self.stock_updated_at.is_some()
    }
}

/// Human-facing order code: 8-digit timestamp suffix plus a zero-padded
/// 3-digit random number. Not collision-free on its own; the order store
/// enforces uniqueness and callers retry on conflict.
pub fn generate_order_number() -> String {
    let ts = Utc::now().timestamp_millis().unsigned_abs() % 100_000_000;
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);
    format!("ORD-{ts:08}{suffix:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: i32, unit_price: i64) -> LineItem {
        LineItem {
            product_id: Uuid::new_v4(),
            product_name: "Fleur de Sel".to_string(),
            variant: "50ml".to_string(),
            quantity: qty,
            unit_price,
        }
    }

    #[test]
    fn forward_chain_is_allowed() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
    }

    #[test]
    fn cancellation_from_non_terminal_only() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn illegal_transitions_rejected() {
        use OrderStatus::*;
        assert!(!Confirmed.can_transition_to(Confirmed));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Cancelled.can_transition_to(Confirmed));
    }

    #[test]
    fn new_order_totals_and_history() {
        let order = Order::new(
            vec![line(2, 6_500), line(1, 9_500)],
            "USD".to_string(),
            serde_json::json!({"email": "a@b.c"}),
            serde_json::json!({}),
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, 22_500);
        assert_eq!(order.status_history.len(), 1);
        assert_eq!(order.status_history[0].status, OrderStatus::Pending);
        assert!(!order.holds_stock());
    }

    #[test]
    fn order_number_shape() {
        let n = generate_order_number();
        assert!(n.starts_with("ORD-"));
        assert_eq!(n.len(), 4 + 8 + 3);
        assert!(n[4..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn status_round_trips_through_str() {
        use OrderStatus::*;
        for s in [Pending, Confirmed, Processing, Shipped, Delivered, Cancelled] {
            assert_eq!(s.as_str().parse::<OrderStatus>().unwrap(), s);
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
    }
}
