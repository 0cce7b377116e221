//! In-process market store.
//!
//! Orders and trades live behind one lock so `commit_match` sees and writes
//! both order rows and the trade row as a unit. Telemetry and quality history
//! are independent keyed maps.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::repository::{
    DeviceRepository, OrderRepository, PricingAuditSink, QualityRepository, SettlementStore,
    TradeRepository, YieldRepository,
};
use crate::database::schema::types::{OrderSide, OrderStatus, TradeStatus};
use crate::error::{ApiError, Result};
use crate::models::{
    DeviceQualityMetrics, DeviceTelemetry, EnergyOrder, PricingBreakdown, TradeRecord, YieldRecord,
};

#[derive(Default)]
struct OrderBook {
    orders: HashMap<Uuid, EnergyOrder>,
    trades: HashMap<String, TradeRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryMarketStore {
    book: Arc<RwLock<OrderBook>>,
    devices: Arc<DashMap<String, DeviceTelemetry>>,
    quality: Arc<DashMap<Uuid, DeviceQualityMetrics>>,
    audit: Arc<RwLock<Vec<PricingBreakdown>>>,
    yields: Arc<RwLock<Vec<YieldRecord>>>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quality history is fed by delivery reporting outside the core.
    pub fn put_quality(&self, metrics: DeviceQualityMetrics) {
        self.quality.insert(metrics.owner_id, metrics);
    }

    pub async fn audit_entries(&self) -> Vec<PricingBreakdown> {
        self.audit.read().await.clone()
    }

    pub async fn all_trades(&self) -> Vec<TradeRecord> {
        self.book.read().await.trades.values().cloned().collect()
    }
}

fn price_priority(side: OrderSide, a: &EnergyOrder, b: &EnergyOrder) -> std::cmp::Ordering {
    let by_price = match side {
        OrderSide::Sell => a.token_price.cmp(&b.token_price),
        OrderSide::Buy => b.token_price.cmp(&a.token_price),
    };
    by_price.then_with(|| a.created_at.cmp(&b.created_at))
}

#[async_trait]
impl OrderRepository for InMemoryMarketStore {
    async fn create(&self, order: &EnergyOrder) -> Result<EnergyOrder> {
        let mut book = self.book.write().await;
        if book.orders.contains_key(&order.id) {
            return Err(ApiError::Conflict(format!("Order {} already exists", order.id)));
        }
        book.orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EnergyOrder>> {
        Ok(self.book.read().await.orders.get(&id).cloned())
    }

    async fn find_open(&self, side: OrderSide) -> Result<Vec<EnergyOrder>> {
        let book = self.book.read().await;
        let mut open: Vec<EnergyOrder> = book
            .orders
            .values()
            .filter(|o| o.side == side && o.status == OrderStatus::Created)
            .cloned()
            .collect();
        open.sort_by(|a, b| price_priority(side, a, b));
        Ok(open)
    }

    async fn best_open(&self, side: OrderSide) -> Result<Option<EnergyOrder>> {
        let book = self.book.read().await;
        let best = book
            .orders
            .values()
            .filter(|o| o.side == side && o.status == OrderStatus::Created)
            .min_by(|a, b| price_priority(side, a, b))
            .cloned();
        Ok(best)
    }

    async fn count_open(&self, side: OrderSide) -> Result<i64> {
        let book = self.book.read().await;
        let count = book
            .orders
            .values()
            .filter(|o| o.side == side && o.status == OrderStatus::Created)
            .count();
        Ok(count as i64)
    }

    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let mut book = self.book.write().await;
        match book.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TradeRepository for InMemoryMarketStore {
    async fn create(&self, trade: &TradeRecord) -> Result<()> {
        let mut book = self.book.write().await;
        if book.trades.contains_key(&trade.id) {
            return Err(ApiError::Conflict(format!("Trade {} already exists", trade.id)));
        }
        book.trades.insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TradeRecord>> {
        Ok(self.book.read().await.trades.get(id).cloned())
    }

    async fn find_by_user(
        &self,
        user_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TradeRecord>> {
        let book = self.book.read().await;
        let mut trades: Vec<TradeRecord> = book
            .trades
            .values()
            .filter(|t| t.donor_id == user_id || t.recipient_id == user_id)
            .filter(|t| from.map_or(true, |f| t.created_at >= f))
            .filter(|t| to.map_or(true, |until| t.created_at <= until))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trades)
    }

    async fn record_ledger_outcome(
        &self,
        trade_id: &str,
        reference: &str,
        status: TradeStatus,
    ) -> Result<bool> {
        let mut book = self.book.write().await;
        match book.trades.get_mut(trade_id) {
            Some(trade) if trade.status == TradeStatus::Pending => {
                trade.status = status;
                trade.ledger_reference = reference.to_string();
                if status == TradeStatus::Confirmed {
                    trade.confirmed_at = Some(Utc::now());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SettlementStore for InMemoryMarketStore {
    async fn commit_match(&self, buy_order_id: Uuid, sell_order_id: Uuid, trade: &TradeRecord) -> Result<()> {
        let mut book = self.book.write().await;

        for id in [buy_order_id, sell_order_id] {
            let status = book.orders.get(&id).map(|o| o.status);
            if status != Some(OrderStatus::Created) {
                return Err(ApiError::Conflict(format!(
                    "Order {} is no longer open (status: {})",
                    id,
                    status.map(|s| s.to_string()).unwrap_or_else(|| "missing".to_string())
                )));
            }
        }
        if book.trades.contains_key(&trade.id) {
            return Err(ApiError::Conflict(format!("Trade {} already exists", trade.id)));
        }

        for id in [buy_order_id, sell_order_id] {
            if let Some(order) = book.orders.get_mut(&id) {
                order.status = OrderStatus::Matched;
            }
        }
        book.trades.insert(trade.id.clone(), trade.clone());
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for InMemoryMarketStore {
    async fn list_all(&self) -> Result<Vec<DeviceTelemetry>> {
        Ok(self.devices.iter().map(|d| d.value().clone()).collect())
    }

    async fn find_lock_capable(&self, owner_id: Uuid, device_type: &str) -> Result<Option<DeviceTelemetry>> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.owner_id == owner_id && d.device_type == device_type)
            .map(|d| d.value().clone()))
    }

    async fn upsert(&self, device: &DeviceTelemetry) -> Result<()> {
        self.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn set_battery_level(&self, device_id: &str, level: f64) -> Result<()> {
        match self.devices.get_mut(device_id) {
            Some(mut device) => {
                device.battery_level = Some(level);
                device.last_ping = Some(Utc::now());
                Ok(())
            }
            None => Err(ApiError::not_found("Device")),
        }
    }
}

#[async_trait]
impl QualityRepository for InMemoryMarketStore {
    async fn get(&self, owner_id: Uuid) -> Result<Option<DeviceQualityMetrics>> {
        Ok(self.quality.get(&owner_id).map(|m| m.value().clone()))
    }
}

#[async_trait]
impl PricingAuditSink for InMemoryMarketStore {
    async fn append(&self, breakdown: &PricingBreakdown) -> Result<()> {
        self.audit.write().await.push(breakdown.clone());
        Ok(())
    }
}

#[async_trait]
impl YieldRepository for InMemoryMarketStore {
    async fn append(&self, record: &YieldRecord) -> Result<()> {
        self.yields.write().await.push(record.clone());
        Ok(())
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<YieldRecord>> {
        let yields = self.yields.read().await;
        let mut records: Vec<YieldRecord> = yields.iter().filter(|y| y.user_id == user_id).cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
