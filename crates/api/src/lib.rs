//! HTTP API server for the medicine cart and order pipeline.
//!
//! Provides REST endpoints for carts and orders, with bearer-token
//! authentication, structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::{CartService, OrderService, Store};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::IdentityProvider;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub carts: CartService<dyn Store>,
    pub orders: OrderService<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Builds the services over one shared store.
    pub fn new(store: Arc<dyn Store>, identity: Arc<dyn IdentityProvider>) -> Arc<Self> {
        Arc::new(Self {
            carts: CartService::new(store.clone()),
            orders: OrderService::new(store),
            identity,
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/cart",
            get(routes::cart::get).delete(routes::cart::clear),
        )
        .route("/cart/summary", get(routes::cart::summary))
        .route("/cart/count", get(routes::cart::count))
        .route("/cart/validate", post(routes::cart::validate))
        .route("/cart/items", post(routes::cart::add_item))
        .route(
            "/cart/items/{id}",
            put(routes::cart::update_item).delete(routes::cart::remove_item),
        )
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/orders/from-cart", post(routes::orders::create_from_cart))
        .route("/orders/stats", get(routes::orders::stats))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/status", put(routes::orders::update_status))
        .route("/orders/{id}/delivery", put(routes::orders::assign_delivery))
        .route("/orders/{id}/tracking", get(routes::orders::tracking))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
