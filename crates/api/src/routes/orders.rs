//! Order creation, query and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{
    CancellationRequest, Checkout, DeliveryAssignment, Order, OrderItemRequest, OrderStats,
    OrderStatus, OrderTracking, StatusUpdateRequest,
};
use serde::Deserialize;

use super::parse_id;
use crate::AppState;
use crate::auth::Authenticated;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    #[serde(flatten)]
    pub checkout: Checkout,
}

#[derive(Debug, Deserialize)]
pub struct CreateFromCartRequest {
    #[serde(flatten)]
    pub checkout: Checkout,
    #[serde(default = "default_validate_prescriptions")]
    pub validate_prescriptions: bool,
}

fn default_validate_prescriptions() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

// -- Handlers --

/// POST /orders: create an order directly from a list of items.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .orders
        .create_order(&caller, req.items, req.checkout)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// POST /orders/from-cart: check out the caller's cart.
#[tracing::instrument(skip(state, req))]
pub async fn create_from_cart(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(req): Json<CreateFromCartRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .orders
        .create_order_from_cart(&caller, req.checkout, req.validate_prescriptions)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: newest first; customers only see their own orders.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state
        .orders
        .list_orders(&caller, query.status, query.limit, query.offset)
        .await?;
    Ok(Json(orders))
}

/// GET /orders/stats
#[tracing::instrument(skip(state))]
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> Result<Json<OrderStats>, ApiError> {
    Ok(Json(state.orders.order_stats(&caller).await?))
}

/// GET /orders/:id
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    Ok(Json(state.orders.get_order(&caller, order_id).await?))
}

/// PUT /orders/:id/status
#[tracing::instrument(skip(state, req))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let order = state
        .orders
        .update_order_status(&caller, order_id, req)
        .await?;
    Ok(Json(order))
}

/// PUT /orders/:id/delivery
#[tracing::instrument(skip(state, req))]
pub async fn assign_delivery(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    Json(req): Json<DeliveryAssignment>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    Ok(Json(state.orders.assign_delivery(&caller, order_id, req).await?))
}

/// GET /orders/:id/tracking
#[tracing::instrument(skip(state))]
pub async fn tracking(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<OrderTracking>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    Ok(Json(state.orders.get_order_tracking(&caller, order_id).await?))
}

/// POST /orders/:id/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    Json(req): Json<CancellationRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    Ok(Json(state.orders.cancel_order(&caller, order_id, req).await?))
}
