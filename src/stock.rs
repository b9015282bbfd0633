//! Stock availability and reconciliation arithmetic.
//!
//! Everything here is pure: the stores feed in current counters and apply
//! the results inside their own atomic scope (a database transaction or an
//! in-memory lock).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::LineItem;
use crate::domain::product::Product;
use crate::{CommerceError, Result};

/// Stock/sold counters for one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub stock: i32,
    pub sold: i32,
}

/// A product's ledger as seen by the checker and mutator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    pub product_id: Uuid,
    pub product_name: String,
    pub variants: BTreeMap<String, Counters>,
}

impl ProductStock {
    /// Units available for a variant; an undeclared variant has zero.
    pub fn available(&self, label: &str) -> i32 {
        self.variants.get(label).map(|c| c.stock).unwrap_or(0)
    }
}

impl From<&Product> for ProductStock {
    fn from(p: &Product) -> Self {
        Self {
            product_id: p.id,
            product_name: p.name.clone(),
            variants: p
                .variants
                .iter()
                .map(|v| (v.label.clone(), Counters { stock: v.stock, sold: v.sold }))
                .collect(),
        }
    }
}

/// Per-line verdict from the availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAvailability {
    pub product_id: Uuid,
    pub product_name: String,
    pub variant: String,
    pub requested: i32,
    pub available: i32,
    pub sufficient: bool,
}

/// Shortfall detail surfaced to the operator on a blocked confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineShortfall {
    pub product_id: Uuid,
    pub product_name: String,
    pub variant: String,
    pub requested: i32,
    pub available: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityReport {
    pub all_sufficient: bool,
    pub lines: Vec<LineAvailability>,
}

impl AvailabilityReport {
    pub fn shortfalls(&self) -> Vec<LineShortfall> {
        self.lines
            .iter()
            .filter(|l| !l.sufficient)
            .map(|l| LineShortfall {
                product_id: l.product_id,
                product_name: l.product_name.clone(),
                variant: l.variant.clone(),
                requested: l.requested,
                available: l.available,
            })
            .collect()
    }
}

/// Compare requested quantities against current stock, line by line.
/// Read-only; the boundary is inclusive (`requested == available` passes).
///
/// Fails with `ProductNotFound` if a line references a product absent from
/// `products`.
pub fn check_availability(
    items: &[LineItem],
    products: &HashMap<Uuid, ProductStock>,
) -> Result<AvailabilityReport> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = products
            .get(&item.product_id)
            .ok_or(CommerceError::ProductNotFound(item.product_id))?;
        let available = product.available(&item.variant);
        lines.push(LineAvailability {
            product_id: item.product_id,
            product_name: product.product_name.clone(),
            variant: item.variant.clone(),
            requested: item.quantity,
            available,
            sufficient: item.quantity <= available,
        });
    }
    let all_sufficient = lines.iter().all(|l| l.sufficient);
    Ok(AvailabilityReport { all_sufficient, lines })
}

/// Signed per-(product, variant) quantity deltas. Positive deltas come from
/// a confirmation (stock down, sold up); negative deltas restore.
///
/// Keyed by `BTreeMap` so stores walk products in a stable order when
/// locking rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockDeltas(BTreeMap<Uuid, BTreeMap<String, i32>>);

impl StockDeltas {
    pub fn for_confirmation(items: &[LineItem]) -> Self {
        Self::from_items(items, 1)
    }

    pub fn for_restoration(items: &[LineItem]) -> Self {
        Self::from_items(items, -1)
    }

    fn from_items(items: &[LineItem], sign: i32) -> Self {
        let mut map: BTreeMap<Uuid, BTreeMap<String, i32>> = BTreeMap::new();
        for item in items {
            *map.entry(item.product_id)
                .or_default()
                .entry(item.variant.clone())
                .or_insert(0) += sign * item.quantity;
        }
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn product_ids(&self) -> Vec<Uuid> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &BTreeMap<String, i32>)> {
        self.0.iter()
    }
}

/// `stock -= delta; sold += delta`, both clamped at a floor of zero. The
/// clamp is defensive; availability is checked before confirmation.
pub fn apply_delta(counters: Counters, delta: i32) -> Counters {
    Counters {
        stock: (i64::from(counters.stock) - i64::from(delta)).max(0) as i32,
        sold: (i64::from(counters.sold) + i64::from(delta)).max(0) as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(id: Uuid, name: &str, stock: i32, sold: i32) -> ProductStock {
        let mut variants = BTreeMap::new();
        variants.insert("50ml".to_string(), Counters { stock, sold });
        ProductStock { product_id: id, product_name: name.to_string(), variants }
    }

    fn line(id: Uuid, variant: &str, qty: i32) -> LineItem {
        LineItem {
            product_id: id,
            product_name: String::new(),
            variant: variant.to_string(),
            quantity: qty,
            unit_price: 100,
        }
    }

    #[test]
    fn boundary_equal_is_sufficient() {
        let id = Uuid::new_v4();
        let products = HashMap::from([(id, ledger(id, "P", 5, 0))]);
        let report = check_availability(&[line(id, "50ml", 5)], &products).unwrap();
        assert!(report.all_sufficient);
        assert!(report.shortfalls().is_empty());
    }

    #[test]
    fn shortfall_reported_per_line() {
        let id = Uuid::new_v4();
        let products = HashMap::from([(id, ledger(id, "P", 2, 0))]);
        let report = check_availability(&[line(id, "50ml", 5)], &products).unwrap();
        assert!(!report.all_sufficient);
        let shortfalls = report.shortfalls();
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].requested, 5);
        assert_eq!(shortfalls[0].available, 2);
        assert_eq!(shortfalls[0].product_name, "P");
    }

    #[test]
    fn undeclared_variant_reads_as_zero() {
        let id = Uuid::new_v4();
        let products = HashMap::from([(id, ledger(id, "P", 5, 0))]);
        let report = check_availability(&[line(id, "100ml", 1)], &products).unwrap();
        assert!(!report.all_sufficient);
        assert_eq!(report.lines[0].available, 0);
    }

    #[test]
    fn missing_product_fails() {
        let err = check_availability(&[line(Uuid::new_v4(), "50ml", 1)], &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CommerceError::ProductNotFound(_)));
    }

    #[test]
    fn deltas_aggregate_repeated_lines() {
        let id = Uuid::new_v4();
        let items = [line(id, "50ml", 2), line(id, "50ml", 3)];
        let deltas = StockDeltas::for_confirmation(&items);
        let (_, per_variant) = deltas.iter().next().unwrap();
        assert_eq!(per_variant["50ml"], 5);

        let restore = StockDeltas::for_restoration(&items);
        let (_, per_variant) = restore.iter().next().unwrap();
        assert_eq!(per_variant["50ml"], -5);
    }

    #[test]
    fn apply_delta_moves_both_counters() {
        let c = apply_delta(Counters { stock: 5, sold: 10 }, 3);
        assert_eq!(c, Counters { stock: 2, sold: 13 });

        let c = apply_delta(c, -3);
        assert_eq!(c, Counters { stock: 5, sold: 10 });
    }

    #[test]
    fn apply_delta_clamps_at_zero() {
        let c = apply_delta(Counters { stock: 1, sold: 0 }, 4);
        assert_eq!(c, Counters { stock: 0, sold: 4 });

        let c = apply_delta(Counters { stock: 2, sold: 1 }, -4);
        assert_eq!(c, Counters { stock: 6, sold: 0 });
    }
}
