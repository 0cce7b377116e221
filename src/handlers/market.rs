use axum::{extract::State, response::Json};

use crate::error::Result;
use crate::models::PriceQuote;
use crate::AppState;

/// Current estimated settlement price with its factor breakdown.
/// GET /api/v1/market/price
pub async fn get_price_quote(State(state): State<AppState>) -> Result<Json<PriceQuote>> {
    let quote = state.matching_engine.quote_price().await?;
    Ok(Json(quote))
}
