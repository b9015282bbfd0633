//! Product catalog entries and their per-variant stock ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A purchasable size of a product (e.g. "50ml"), with its own price and
/// stock/sold counters. Counters never go below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub label: String,
    /// Price in the smallest currency unit (e.g. cents).
    pub price: i64,
    pub stock: i32,
    pub sold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Fallback price for variants without explicit pricing.
    pub base_price: i64,
    pub currency: String,
    pub collection_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub status: String,
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn variant(&self, label: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.label == label)
    }

    /// Units available for a variant. An undeclared variant has zero stock.
    pub fn available(&self, label: &str) -> i32 {
        self.variant(label).map(|v| v.stock).unwrap_or(0)
    }

    /// Unit price for a variant, falling back to the base price.
    pub fn unit_price(&self, label: &str) -> i64 {
        self.variant(label).map(|v| v.price).unwrap_or(self.base_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product() -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Nuit Ambrée".to_string(),
            description: None,
            base_price: 9_500,
            currency: "USD".to_string(),
            collection_id: None,
            image_url: None,
            status: "active".to_string(),
            variants: vec![
                Variant { label: "30ml".to_string(), price: 6_500, stock: 4, sold: 1 },
                Variant { label: "50ml".to_string(), price: 9_500, stock: 0, sold: 12 },
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn available_for_declared_variant() {
        let p = sample_product();
        assert_eq!(p.available("30ml"), 4);
        assert_eq!(p.available("50ml"), 0);
    }

    #[test]
    fn undeclared_variant_has_zero_stock() {
        let p = sample_product();
        assert_eq!(p.available("100ml"), 0);
    }

    #[test]
    fn unit_price_falls_back_to_base_price() {
        let p = sample_product();
        assert_eq!(p.unit_price("30ml"), 6_500);
        assert_eq!(p.unit_price("100ml"), 9_500);
    }
}
