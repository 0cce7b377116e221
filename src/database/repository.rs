//! Storage capabilities consumed by the market core.
//!
//! Every component receives these as `Arc<dyn Trait>` so the Postgres store and
//! the in-memory store are interchangeable. Status changes are always
//! compare-and-swap: implementations must apply `from -> to` only while the
//! stored row is still in `from`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::schema::types::{OrderSide, OrderStatus, TradeStatus};
use crate::error::Result;
use crate::models::{
    DeviceQualityMetrics, DeviceTelemetry, EnergyOrder, PricingBreakdown, TradeRecord, YieldRecord,
};

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: &EnergyOrder) -> Result<EnergyOrder>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EnergyOrder>>;

    /// Created orders of one side in price priority: sells by ascending limit
    /// price, buys by descending limit price, ties broken by creation time.
    async fn find_open(&self, side: OrderSide) -> Result<Vec<EnergyOrder>>;

    /// Head of `find_open`: the best ask or the best bid.
    async fn best_open(&self, side: OrderSide) -> Result<Option<EnergyOrder>> {
        Ok(self.find_open(side).await?.into_iter().next())
    }

    async fn count_open(&self, side: OrderSide) -> Result<i64>;

    /// Returns `false` when the row was not in `from` at write time, or when
    /// `from -> to` is not an edge of the order state machine.
    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<bool>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn create(&self, trade: &TradeRecord) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<TradeRecord>>;

    /// Trades where the user is buyer or seller, newest first.
    async fn find_by_user(
        &self,
        user_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TradeRecord>>;

    /// Moves a `Pending` trade to its ledger outcome. Returns `false` if the
    /// trade was missing or already resolved.
    async fn record_ledger_outcome(
        &self,
        trade_id: &str,
        reference: &str,
        status: TradeStatus,
    ) -> Result<bool>;
}

/// The atomic step of settlement.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Moves both orders `Created -> Matched` and inserts the trade in one
    /// unit. Fails with `ApiError::Conflict`, writing nothing, if either order
    /// is no longer `Created`.
    async fn commit_match(&self, buy_order_id: Uuid, sell_order_id: Uuid, trade: &TradeRecord) -> Result<()>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<DeviceTelemetry>>;

    async fn find_lock_capable(&self, owner_id: Uuid, device_type: &str) -> Result<Option<DeviceTelemetry>>;

    async fn upsert(&self, device: &DeviceTelemetry) -> Result<()>;

    async fn set_battery_level(&self, device_id: &str, level: f64) -> Result<()>;
}

#[async_trait]
pub trait QualityRepository: Send + Sync {
    async fn get(&self, owner_id: Uuid) -> Result<Option<DeviceQualityMetrics>>;
}

#[async_trait]
pub trait PricingAuditSink: Send + Sync {
    async fn append(&self, breakdown: &PricingBreakdown) -> Result<()>;
}

#[async_trait]
pub trait YieldRepository: Send + Sync {
    async fn append(&self, record: &YieldRecord) -> Result<()>;

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<YieldRecord>>;
}
