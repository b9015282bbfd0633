//! Atelier Commerce
//!
//! Storefront backend for a perfume brand.
//!
//! ## Features
//! - Product catalog with per-variant stock/sold ledgers
//! - Shopping cart and checkout
//! - Order lifecycle with inventory reconciliation
//! - Collections, hero images, contact messages (back office)

use thiserror::Error;
use uuid::Uuid;

pub mod api;
pub mod domain;
pub mod service;
pub mod stock;
pub mod store;

use crate::domain::order::OrderStatus;
use crate::stock::LineShortfall;

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("order not found")]
    OrderNotFound,

    #[error("product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<LineShortfall>),

    #[error("cannot transition order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for CommerceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::Storage("row not found".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
