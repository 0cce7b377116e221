use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::config::env_or;
use crate::services::ledger::LedgerSubmission;
use crate::services::task_queue::Task;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Share of trade value accrued to the seller as yield
    pub yield_rate: f64,
    pub yield_source: String,
    /// Prefix of the placeholder ledger reference written at match time
    pub pending_prefix: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            yield_rate: 0.02,
            yield_source: "trade_settlement".to_string(),
            pending_prefix: "pending_".to_string(),
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            yield_rate: env_or("SETTLEMENT_YIELD_RATE", defaults.yield_rate).max(0.0),
            yield_source: std::env::var("SETTLEMENT_YIELD_SOURCE").unwrap_or(defaults.yield_source),
            pending_prefix: std::env::var("SETTLEMENT_PENDING_PREFIX").unwrap_or(defaults.pending_prefix),
        }
    }
}

/// Best-effort work dispatched after a match has been committed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum SideEffectTask {
    DeviceLock {
        seller_id: Uuid,
        sell_order_id: Uuid,
        kwh_amount: Decimal,
    },
    YieldAccrual {
        user_id: Uuid,
        trade_id: String,
        trade_value: Decimal,
    },
    LedgerSubmission(LedgerSubmission),
    LedgerMonitor {
        trade_id: String,
        buy_order_id: Uuid,
        sell_order_id: Uuid,
        reference: String,
    },
}

impl Task for SideEffectTask {
    fn kind(&self) -> &'static str {
        match self {
            SideEffectTask::DeviceLock { .. } => "device_lock",
            SideEffectTask::YieldAccrual { .. } => "yield_accrual",
            SideEffectTask::LedgerSubmission(_) => "ledger_submission",
            SideEffectTask::LedgerMonitor { .. } => "ledger_monitor",
        }
    }
}
