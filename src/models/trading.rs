use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::schema::types::{OrderSide, OrderStatus, TradeStatus};

/// A posted buy or sell order for kWh.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct EnergyOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub side: OrderSide,
    pub kwh_amount: Decimal,
    /// Limit price per kWh: the ask for sells, the maximum bid for buys.
    pub token_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl EnergyOrder {
    pub fn new(user_id: Uuid, side: OrderSide, kwh_amount: Decimal, token_price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            side,
            kwh_amount,
            token_price,
            status: OrderStatus::Created,
            created_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Created
    }
}

/// Settlement record written once per successful match.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TradeRecord {
    pub id: String,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    /// Seller (donor)
    pub donor_id: Uuid,
    /// Buyer (recipient)
    pub recipient_id: Uuid,
    pub kwh_amount: Decimal,
    /// Total settled value: `kwh_amount * unit_price`
    pub token_amount: Decimal,
    pub unit_price: Decimal,
    pub ledger_reference: String,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    /// Trade identity is derived from the buy order so a buy order can only
    /// ever produce one trade row.
    pub fn trade_id_for(buy_order_id: Uuid) -> String {
        format!("txn_{}", buy_order_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub side: OrderSide,
    pub kwh_amount: Decimal,
    pub token_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeHistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
