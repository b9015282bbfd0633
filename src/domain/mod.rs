//! Domain types: products with variant stock ledgers, orders with a status
//! lifecycle.

pub mod order;
pub mod product;

pub use order::{LineItem, Order, OrderStatus, StatusHistoryEntry};
pub use product::{Product, Variant};
