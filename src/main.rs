//! Atelier Commerce - perfume storefront and back office

use anyhow::Result;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_commerce::api::{self, AppState};
use atelier_commerce::service::OrderService;
use atelier_commerce::store::{PgOrderStore, PgProductStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => match async_nats::connect(&url).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events disabled");
                None
            }
        },
        Err(_) => None,
    };

    let products = PgProductStore::new(db.clone());
    let orders = OrderService::new(products.clone(), PgOrderStore::new(db.clone()));
    let state = AppState { db, products, orders, nats };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "atelier-commerce"})) }))
        .route("/api/v1/products", get(api::list_products))
        .route("/api/v1/products/:id", get(api::get_product))
        .route("/api/v1/collections", get(api::list_collections))
        .route("/api/v1/collections/:id", get(api::get_collection))
        .route("/api/v1/cart/:session", get(api::get_cart).post(api::add_to_cart).delete(api::clear_cart))
        .route("/api/v1/cart/:session/items/:id", delete(api::remove_cart_item))
        .route("/api/v1/checkout", post(api::checkout))
        .route("/api/v1/contact", post(api::submit_contact))
        .route("/api/v1/hero-images", get(api::list_hero_images))
        .route("/api/v1/admin/products", post(api::create_product))
        .route("/api/v1/admin/products/:id", put(api::update_product).delete(api::archive_product))
        .route("/api/v1/admin/products/:id/variants/:label/stock", put(api::restock_variant))
        .route("/api/v1/admin/collections", post(api::create_collection))
        .route("/api/v1/admin/orders", get(api::list_orders))
        .route("/api/v1/admin/orders/:id", get(api::get_order))
        .route("/api/v1/admin/orders/:id/status", put(api::update_order_status))
        .route("/api/v1/admin/contact", get(api::list_contact_messages))
        .route("/api/v1/admin/contact/:id/read", put(api::mark_contact_read))
        .route("/api/v1/admin/hero-images", post(api::create_hero_image))
        .route("/api/v1/admin/hero-images/:id", delete(api::deactivate_hero_image))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8083".to_string());
    tracing::info!("🚀 Atelier Commerce listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}
