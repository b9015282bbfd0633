//! HTTP surface: public storefront routes plus the back office.
//!
//! This layer is the only place domain errors become HTTP responses; stock
//! shortfall details are passed through verbatim so the operator sees the
//! per-line numbers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::order::{Order, OrderStatus};
use crate::domain::product::Product;
use crate::service::{CheckoutLine, CheckoutOrder, OrderService};
use crate::store::{PgOrderStore, PgProductStore, ProductStore};
use crate::CommerceError;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub products: PgProductStore,
    pub orders: OrderService<PgProductStore, PgOrderStore>,
    pub nats: Option<async_nats::Client>,
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::OrderNotFound | Self::ProductNotFound(_) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InsufficientStock(_) | Self::InvalidTransition { .. } | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let Self::Storage(msg) = &self {
            tracing::error!(error = %msg, "storage failure");
        }
        let body = match &self {
            Self::InsufficientStock(lines) => serde_json::json!({
                "error": self.to_string(),
                "insufficient_lines": lines,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, CommerceError>;

async fn publish_event(state: &AppState, subject: &str, payload: serde_json::Value) {
    if let Some(nats) = &state.nats {
        if let Err(e) = nats.publish(subject.to_string(), payload.to_string().into()).await {
            tracing::warn!(error = %e, subject, "event publish failed");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub collection: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

fn page_window(page: Option<u32>, per_page: Option<u32>) -> (u32, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).min(100);
    (page, per_page as i64, ((page - 1) * per_page) as i64)
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
    pub base_price: i64,
    pub currency: String,
    pub collection_id: Option<Uuid>,
    pub image_url: Option<String>,
}

pub async fn list_products(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
) -> ApiResult<Json<PaginatedResponse<ProductSummary>>> {
    let (page, limit, offset) = page_window(p.page, p.per_page);
    let products: Vec<ProductSummary> = sqlx::query_as(
        "SELECT id, name, base_price, currency, collection_id, image_url FROM products \
         WHERE status = 'active' \
           AND ($3::uuid IS NULL OR collection_id = $3) \
           AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%') \
         ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .bind(p.collection)
    .bind(&p.search)
    .fetch_all(&s.db)
    .await?;
    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM products WHERE status = 'active' \
           AND ($1::uuid IS NULL OR collection_id = $1) \
           AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%')",
    )
    .bind(p.collection)
    .bind(&p.search)
    .fetch_one(&s.db)
    .await?;
    Ok(Json(PaginatedResponse { data: products, total: total.0, page }))
}

pub async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.products.get(id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct VariantInput {
    #[validate(length(min = 1))]
    pub label: String,
    pub price: Option<i64>,
    pub stock: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1))]
    pub name: String,
    pub description: Option<String>,
    pub base_price: i64,
    pub currency: Option<String>,
    pub collection_id: Option<Uuid>,
    pub image_url: Option<String>,
    #[validate]
    pub variants: Vec<VariantInput>,
}

pub async fn create_product(
    State(s): State<AppState>,
    Json(r): Json<CreateProductRequest>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    if r.variants.is_empty() {
        return Err(CommerceError::Validation("product needs at least one variant".to_string()));
    }
    let mut labels: Vec<&str> = r.variants.iter().map(|v| v.label.as_str()).collect();
    labels.sort_unstable();
    labels.dedup();
    if labels.len() != r.variants.len() {
        return Err(CommerceError::Validation("duplicate variant labels".to_string()));
    }

    let id = Uuid::now_v7();
    let mut tx = s.db.begin().await?;
    sqlx::query(
        "INSERT INTO products (id, name, description, base_price, currency, collection_id, image_url, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', NOW(), NOW())",
    )
    .bind(id)
    .bind(&r.name)
    .bind(&r.description)
    .bind(r.base_price)
    .bind(r.currency.as_deref().unwrap_or("USD"))
    .bind(r.collection_id)
    .bind(&r.image_url)
    .execute(&mut *tx)
    .await?;
    for (position, v) in r.variants.iter().enumerate() {
        sqlx::query(
            "INSERT INTO product_variants (product_id, label, position, price, stock, sold) \
             VALUES ($1, $2, $3, $4, $5, 0)",
        )
        .bind(id)
        .bind(&v.label)
        .bind(position as i32)
        .bind(v.price.unwrap_or(r.base_price))
        .bind(v.stock.unwrap_or(0).max(0))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(s.products.get(id).await?)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1))]
    pub name: String,
    pub description: Option<String>,
    pub base_price: i64,
    pub collection_id: Option<Uuid>,
    pub image_url: Option<String>,
}

pub async fn update_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateProductRequest>,
) -> ApiResult<Json<Product>> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    let updated = sqlx::query(
        "UPDATE products SET name = $2, description = $3, base_price = $4, collection_id = $5, \
         image_url = $6, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(&r.name)
    .bind(&r.description)
    .bind(r.base_price)
    .bind(r.collection_id)
    .bind(&r.image_url)
    .execute(&s.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(CommerceError::ProductNotFound(id));
    }
    Ok(Json(s.products.get(id).await?))
}

pub async fn archive_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let updated = sqlx::query("UPDATE products SET status = 'archived', updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&s.db)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(CommerceError::ProductNotFound(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct RestockRequest {
    #[validate(range(min = 0))]
    pub stock: i32,
}

/// Back-office restock: sets the absolute stock level for one variant.
/// Sold counters are only ever touched by order reconciliation.
pub async fn restock_variant(
    State(s): State<AppState>,
    Path((id, label)): Path<(Uuid, String)>,
    Json(r): Json<RestockRequest>,
) -> ApiResult<Json<Product>> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    let updated = sqlx::query(
        "UPDATE product_variants SET stock = $3 WHERE product_id = $1 AND label = $2",
    )
    .bind(id)
    .bind(&label)
    .bind(r.stock)
    .execute(&s.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(CommerceError::Validation(format!("unknown variant {label}")));
    }
    Ok(Json(s.products.get(id).await?))
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn list_collections(State(s): State<AppState>) -> ApiResult<Json<Vec<Collection>>> {
    let collections: Vec<Collection> =
        sqlx::query_as("SELECT * FROM collections ORDER BY name")
            .fetch_all(&s.db)
            .await?;
    Ok(Json(collections))
}

pub async fn get_collection(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Collection>> {
    sqlx::query_as::<_, Collection>("SELECT * FROM collections WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await?
        .map(Json)
        .ok_or(CommerceError::NotFound("collection"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCollectionRequest {
    #[validate(length(min = 1))]
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

pub async fn create_collection(
    State(s): State<AppState>,
    Json(r): Json<CreateCollectionRequest>,
) -> ApiResult<(StatusCode, Json<Collection>)> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    let slug = r.name.to_lowercase().replace(' ', "-");
    let collection: Collection = sqlx::query_as(
        "INSERT INTO collections (id, name, slug, description, image_url, created_at) \
         VALUES ($1, $2, $3, $4, $5, NOW()) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&r.name)
    .bind(&slug)
    .bind(&r.description)
    .bind(&r.image_url)
    .fetch_one(&s.db)
    .await?;
    Ok((StatusCode::CREATED, Json(collection)))
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub variant: String,
    pub quantity: i32,
    pub unit_price: i64,
}

pub async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> ApiResult<Json<Vec<CartLine>>> {
    let lines: Vec<CartLine> = sqlx::query_as(
        "SELECT c.id, c.product_id, p.name AS product_name, c.variant, c.quantity, v.price AS unit_price \
         FROM cart_items c \
         JOIN products p ON p.id = c.product_id \
         JOIN product_variants v ON v.product_id = c.product_id AND v.label = c.variant \
         WHERE c.session_id = $1 ORDER BY c.created_at",
    )
    .bind(&session)
    .fetch_all(&s.db)
    .await?;
    Ok(Json(lines))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub variant: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

pub async fn add_to_cart(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(r): Json<AddToCartRequest>,
) -> ApiResult<(StatusCode, Json<Vec<CartLine>>)> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    let product = s.products.get(r.product_id).await?;
    if product.variant(&r.variant).is_none() {
        return Err(CommerceError::Validation(format!(
            "unknown variant {} for product {}",
            r.variant, product.name
        )));
    }
    sqlx::query(
        "INSERT INTO cart_items (id, session_id, product_id, variant, quantity, created_at) \
         VALUES ($1, $2, $3, $4, $5, NOW()) \
         ON CONFLICT (session_id, product_id, variant) \
         DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity",
    )
    .bind(Uuid::now_v7())
    .bind(&session)
    .bind(r.product_id)
    .bind(&r.variant)
    .bind(r.quantity)
    .execute(&s.db)
    .await?;
    let cart = get_cart(State(s), Path(session)).await?;
    Ok((StatusCode::CREATED, cart))
}

pub async fn remove_cart_item(
    State(s): State<AppState>,
    Path((session, item_id)): Path<(String, Uuid)>,
) -> ApiResult<StatusCode> {
    sqlx::query("DELETE FROM cart_items WHERE session_id = $1 AND id = $2")
        .bind(&session)
        .bind(item_id)
        .execute(&s.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> ApiResult<StatusCode> {
    sqlx::query("DELETE FROM cart_items WHERE session_id = $1")
        .bind(&session)
        .execute(&s.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Checkout and orders
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CustomerInfo {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutItemRequest {
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub variant: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate]
    pub customer: CustomerInfo,
    pub shipping_address: serde_json::Value,
    #[validate]
    pub items: Vec<CheckoutItemRequest>,
    /// When supplied, the session cart is cleared after the order lands.
    pub session_id: Option<String>,
}

pub async fn checkout(
    State(s): State<AppState>,
    Json(r): Json<CheckoutRequest>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    let customer_info = serde_json::to_value(&r.customer)
        .map_err(|e| CommerceError::Validation(e.to_string()))?;
    let order = s
        .orders
        .checkout(CheckoutOrder {
            lines: r
                .items
                .iter()
                .map(|i| CheckoutLine {
                    product_id: i.product_id,
                    variant: i.variant.clone(),
                    quantity: i.quantity,
                })
                .collect(),
            customer_info,
            shipping_address: r.shipping_address,
        })
        .await?;
    if let Some(session) = &r.session_id {
        sqlx::query("DELETE FROM cart_items WHERE session_id = $1")
            .bind(session)
            .execute(&s.db)
            .await?;
    }
    publish_event(
        &s,
        "orders.created",
        serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "total_amount": order.total_amount,
        }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<OrderStatus>,
}

pub async fn list_orders(
    State(s): State<AppState>,
    Query(p): Query<OrderListParams>,
) -> ApiResult<Json<PaginatedResponse<Order>>> {
    let (page, limit, offset) = page_window(p.page, p.per_page);
    let (orders, total) = s.orders.list_orders(p.status, limit, offset).await?;
    Ok(Json(PaginatedResponse { data: orders, total, page }))
}

pub async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.get_order(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub notes: Option<String>,
}

pub async fn update_order_status(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Order>> {
    let order = s.orders.update_status(id, r.status, r.notes).await?;
    publish_event(
        &s,
        "orders.status_changed",
        serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "status": order.status,
        }),
    )
    .await;
    Ok(Json(order))
}

// ---------------------------------------------------------------------------
// Contact messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ContactMessage {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ContactRequest {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub message: String,
}

pub async fn submit_contact(
    State(s): State<AppState>,
    Json(r): Json<ContactRequest>,
) -> ApiResult<(StatusCode, Json<ContactMessage>)> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    let message: ContactMessage = sqlx::query_as(
        "INSERT INTO contact_messages (id, name, email, message, is_read, created_at) \
         VALUES ($1, $2, $3, $4, FALSE, NOW()) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&r.name)
    .bind(&r.email)
    .bind(&r.message)
    .fetch_one(&s.db)
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_contact_messages(State(s): State<AppState>) -> ApiResult<Json<Vec<ContactMessage>>> {
    let messages: Vec<ContactMessage> =
        sqlx::query_as("SELECT * FROM contact_messages ORDER BY created_at DESC LIMIT 200")
            .fetch_all(&s.db)
            .await?;
    Ok(Json(messages))
}

pub async fn mark_contact_read(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let updated = sqlx::query("UPDATE contact_messages SET is_read = TRUE WHERE id = $1")
        .bind(id)
        .execute(&s.db)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(CommerceError::NotFound("contact message"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Hero images
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct HeroImage {
    pub id: Uuid,
    pub image_url: String,
    pub title: Option<String>,
    pub position: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn list_hero_images(State(s): State<AppState>) -> ApiResult<Json<Vec<HeroImage>>> {
    let images: Vec<HeroImage> =
        sqlx::query_as("SELECT * FROM hero_images WHERE active ORDER BY position")
            .fetch_all(&s.db)
            .await?;
    Ok(Json(images))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateHeroImageRequest {
    #[validate(url)]
    pub image_url: String,
    pub title: Option<String>,
    pub position: Option<i32>,
}

pub async fn create_hero_image(
    State(s): State<AppState>,
    Json(r): Json<CreateHeroImageRequest>,
) -> ApiResult<(StatusCode, Json<HeroImage>)> {
    r.validate().map_err(|e| CommerceError::Validation(e.to_string()))?;
    let image: HeroImage = sqlx::query_as(
        "INSERT INTO hero_images (id, image_url, title, position, active, created_at) \
         VALUES ($1, $2, $3, $4, TRUE, NOW()) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&r.image_url)
    .bind(&r.title)
    .bind(r.position.unwrap_or(0))
    .fetch_one(&s.db)
    .await?;
    Ok((StatusCode::CREATED, Json(image)))
}

pub async fn deactivate_hero_image(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let updated = sqlx::query("UPDATE hero_images SET active = FALSE WHERE id = $1")
        .bind(id)
        .execute(&s.db)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(CommerceError::NotFound("hero image"));
    }
    Ok(StatusCode::NO_CONTENT)
}
