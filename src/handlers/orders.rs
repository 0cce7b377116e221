use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::error::Result;
use crate::models::trading::{CancelOrderRequest, CreateOrderRequest};
use crate::models::EnergyOrder;
use crate::AppState;

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<EnergyOrder>)> {
    let order = state.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<EnergyOrder>> {
    Ok(Json(state.orders.get_order(order_id).await?))
}

/// POST /api/v1/orders/{id}/cancel
///
/// 403 for a non-owner, 409 once the order has left `Created`.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<EnergyOrder>> {
    let order = state.orders.cancel_order(request.user_id, order_id).await?;
    Ok(Json(order))
}
