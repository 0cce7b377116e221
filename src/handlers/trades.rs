use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::models::trading::TradeHistoryQuery;
use crate::models::{TradeRecord, YieldRecord};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TradeHistoryResponse {
    pub user_id: Uuid,
    pub trades: Vec<TradeRecord>,
}

#[derive(Debug, Serialize)]
pub struct YieldHistoryResponse {
    pub user_id: Uuid,
    pub total: rust_decimal::Decimal,
    pub records: Vec<YieldRecord>,
}

/// Trades where the user was buyer or seller, newest first.
/// GET /api/v1/users/{id}/trades?from=&to=
pub async fn get_user_trades(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TradeHistoryQuery>,
) -> Result<Json<TradeHistoryResponse>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(ApiError::Validation("`from` must not be after `to`".to_string()));
        }
    }

    let trades = state.trades.find_by_user(user_id, query.from, query.to).await?;
    Ok(Json(TradeHistoryResponse { user_id, trades }))
}

/// GET /api/v1/users/{id}/yield
pub async fn get_user_yield(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<YieldHistoryResponse>> {
    let records = state.yields.find_by_user(user_id).await?;
    let total = records.iter().map(|r| r.amount).sum();
    Ok(Json(YieldHistoryResponse {
        user_id,
        total,
        records,
    }))
}
