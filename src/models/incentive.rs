use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only incentive payout tied to a settled trade.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct YieldRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub source: String,
    pub trade_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
