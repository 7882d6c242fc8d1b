//! Cart endpoints. Every handler acts on the caller's own cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::CartLineId;
use domain::{AddToCart, CartLineView, CartSummary, CartView, UpdateCartLine, ValidationResult};
use serde::Serialize;

use super::parse_id;
use crate::AppState;
use crate::auth::Authenticated;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct CartCountResponse {
    pub count: u32,
}

/// GET /cart: the caller's cart with resolved lines and totals.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(state.carts.get_cart(&caller).await?))
}

/// GET /cart/summary
#[tracing::instrument(skip(state))]
pub async fn summary(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> Result<Json<CartSummary>, ApiError> {
    Ok(Json(state.carts.get_cart_summary(&caller).await?))
}

/// GET /cart/count: total units in the cart.
#[tracing::instrument(skip(state))]
pub async fn count(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> Result<Json<CartCountResponse>, ApiError> {
    let count = state.carts.cart_item_count(&caller).await?;
    Ok(Json(CartCountResponse { count }))
}

/// POST /cart/validate: full validation report, without changing the cart.
#[tracing::instrument(skip(state))]
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> Result<Json<ValidationResult>, ApiError> {
    Ok(Json(state.carts.validate_cart(&caller).await?))
}

/// POST /cart/items: add a medicine, merging with an existing line.
#[tracing::instrument(skip(state, req))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(req): Json<AddToCart>,
) -> Result<(StatusCode, Json<CartLineView>), ApiError> {
    let line = state.carts.add_to_cart(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(line)))
}

/// PUT /cart/items/:id
#[tracing::instrument(skip(state, req))]
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    Json(req): Json<UpdateCartLine>,
) -> Result<Json<CartLineView>, ApiError> {
    let line_id: CartLineId = parse_id(&id)?;
    Ok(Json(state.carts.update_cart_line(&caller, line_id, req).await?))
}

/// DELETE /cart/items/:id
#[tracing::instrument(skip(state))]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let line_id: CartLineId = parse_id(&id)?;
    state.carts.remove_cart_line(&caller, line_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> Result<StatusCode, ApiError> {
    state.carts.clear_cart(&caller).await?;
    Ok(StatusCode::NO_CONTENT)
}
