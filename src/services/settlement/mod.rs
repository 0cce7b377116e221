//! Settlement of a matched pair.
//!
//! Step one is atomic: both orders move `Created -> Matched` and the trade row
//! is written together, or nothing changes. Step two enqueues the device lock,
//! the yield accrual and the ledger submission as independent side effects;
//! their failure never touches step one.

pub mod types;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::repository::{DeviceRepository, SettlementStore, TradeRepository, YieldRepository};
use crate::database::schema::types::TradeStatus;
use crate::error::{ApiError, Result};
use crate::models::{EnergyOrder, PricingBreakdown, TradeRecord, YieldRecord};
use crate::services::device_command::DeviceCommander;
use crate::services::ledger::{LedgerClient, LedgerStatus, LedgerSubmission};
use crate::services::order_service::OrderService;
use crate::services::task_queue::{TaskHandler, TaskQueue};

pub use types::*;

/// Decimal places kept on settled unit prices
const PRICE_SCALE: u32 = 8;

/// Per-kWh price a trade settles at. The matcher compares buyer limits against
/// this same value so the limit check and the written trade agree.
pub fn settlement_unit_price(final_price: f64) -> Option<Decimal> {
    Decimal::from_f64(final_price)
        .map(|p| p.round_dp(PRICE_SCALE))
        .filter(|p| *p > Decimal::ZERO)
}

#[derive(Clone)]
pub struct SettlementCoordinator {
    store: Arc<dyn SettlementStore>,
    queue: Arc<TaskQueue<SideEffectTask>>,
    config: SettlementConfig,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        queue: Arc<TaskQueue<SideEffectTask>>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Settles `buy` against `sell` at `pricing.final_price` per kWh.
    ///
    /// Returns `ApiError::Conflict` when either order left `Created` since the
    /// snapshot; nothing is written in that case.
    pub async fn settle(
        &self,
        buy: &EnergyOrder,
        sell: &EnergyOrder,
        pricing: &PricingBreakdown,
    ) -> Result<TradeRecord> {
        if buy.kwh_amount != sell.kwh_amount {
            return Err(ApiError::Validation(format!(
                "Quantities differ: buy {} kWh, sell {} kWh",
                buy.kwh_amount, sell.kwh_amount
            )));
        }
        let unit_price = settlement_unit_price(pricing.final_price).ok_or_else(|| {
            ApiError::Internal(format!("Unusable settlement price {}", pricing.final_price))
        })?;

        let trade_id = TradeRecord::trade_id_for(buy.id);
        let trade = TradeRecord {
            ledger_reference: format!("{}{}", self.config.pending_prefix, trade_id),
            id: trade_id,
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            donor_id: sell.user_id,
            recipient_id: buy.user_id,
            kwh_amount: buy.kwh_amount,
            token_amount: buy.kwh_amount * unit_price,
            unit_price,
            status: TradeStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
        };

        self.store.commit_match(buy.id, sell.id, &trade).await?;
        info!(
            "🤝 Trade {} settled: {} kWh at {} ({} total), seller {} -> buyer {}",
            trade.id, trade.kwh_amount, trade.unit_price, trade.token_amount, trade.donor_id, trade.recipient_id
        );

        self.dispatch_side_effects(&trade, pricing);
        Ok(trade)
    }

    fn dispatch_side_effects(&self, trade: &TradeRecord, pricing: &PricingBreakdown) {
        self.queue.enqueue(SideEffectTask::DeviceLock {
            seller_id: trade.donor_id,
            sell_order_id: trade.sell_order_id,
            kwh_amount: trade.kwh_amount,
        });
        self.queue.enqueue(SideEffectTask::YieldAccrual {
            user_id: trade.donor_id,
            trade_id: trade.id.clone(),
            trade_value: trade.token_amount,
        });
        self.queue.enqueue(SideEffectTask::LedgerSubmission(LedgerSubmission {
            trade_id: trade.id.clone(),
            buy_order_id: trade.buy_order_id,
            sell_order_id: trade.sell_order_id,
            seller_id: trade.donor_id,
            buyer_id: trade.recipient_id,
            kwh_amount: trade.kwh_amount,
            unit_price: trade.unit_price,
            total: trade.token_amount,
            quality: pricing.q_score.unwrap_or(0.0),
        }));
    }
}

/// Executes settlement side effects pulled from the task queue.
pub struct SideEffectExecutor {
    pub devices: Arc<dyn DeviceRepository>,
    pub commander: Arc<dyn DeviceCommander>,
    pub yields: Arc<dyn YieldRepository>,
    pub ledger: Arc<dyn LedgerClient>,
    pub trades: Arc<dyn TradeRepository>,
    pub orders: OrderService,
    pub lock_device_type: String,
    pub yield_rate: Decimal,
    pub yield_source: String,
}

impl SideEffectExecutor {
    async fn lock_device(&self, seller_id: Uuid, sell_order_id: Uuid, kwh_amount: Decimal) -> anyhow::Result<()> {
        let device = self
            .devices
            .find_lock_capable(seller_id, &self.lock_device_type)
            .await?;
        match device {
            Some(device) => {
                self.commander
                    .send_lock(&device.id, sell_order_id, kwh_amount)
                    .await
            }
            None => {
                info!(
                    "No {} device for seller {}, skipping delivery lock",
                    self.lock_device_type, seller_id
                );
                Ok(())
            }
        }
    }

    async fn accrue_yield(&self, user_id: Uuid, trade_id: &str, trade_value: Decimal) -> anyhow::Result<()> {
        let record = YieldRecord {
            id: Uuid::new_v4(),
            user_id,
            amount: trade_value * self.yield_rate,
            source: self.yield_source.clone(),
            trade_id: Some(trade_id.to_string()),
            created_at: Utc::now(),
        };
        self.yields.append(&record).await?;
        info!("💰 Accrued {} yield to {} for {}", record.amount, user_id, trade_id);
        Ok(())
    }

    async fn reconcile(
        &self,
        trade_id: &str,
        buy_order_id: Uuid,
        sell_order_id: Uuid,
        reference: &str,
    ) -> anyhow::Result<()> {
        let status = match self.ledger.monitor(reference).await? {
            LedgerStatus::Confirmed => TradeStatus::Confirmed,
            LedgerStatus::Failed => TradeStatus::Failed,
            LedgerStatus::Pending => bail!("ledger transaction {} is not final yet", reference),
        };

        let updated = self
            .trades
            .record_ledger_outcome(trade_id, reference, status)
            .await?;
        if !updated {
            warn!("Trade {} was already resolved, ignoring ledger outcome {}", trade_id, status);
            return Ok(());
        }

        match status {
            TradeStatus::Confirmed => {
                for order_id in [buy_order_id, sell_order_id] {
                    if let Err(e) = self.orders.complete_order(order_id).await {
                        warn!("Could not complete order {}: {}", order_id, e);
                    }
                }
                info!("✅ Trade {} confirmed on ledger ({})", trade_id, reference);
            }
            _ => error!("❌ Ledger rejected trade {} ({})", trade_id, reference),
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler<SideEffectTask> for SideEffectExecutor {
    async fn handle(&self, task: &SideEffectTask) -> anyhow::Result<Option<SideEffectTask>> {
        match task {
            SideEffectTask::DeviceLock {
                seller_id,
                sell_order_id,
                kwh_amount,
            } => {
                self.lock_device(*seller_id, *sell_order_id, *kwh_amount).await?;
                Ok(None)
            }
            SideEffectTask::YieldAccrual {
                user_id,
                trade_id,
                trade_value,
            } => {
                self.accrue_yield(*user_id, trade_id, *trade_value).await?;
                Ok(None)
            }
            SideEffectTask::LedgerSubmission(submission) => {
                let reference = self.ledger.submit_trade(submission).await?;
                Ok(Some(SideEffectTask::LedgerMonitor {
                    trade_id: submission.trade_id.clone(),
                    buy_order_id: submission.buy_order_id,
                    sell_order_id: submission.sell_order_id,
                    reference,
                }))
            }
            SideEffectTask::LedgerMonitor {
                trade_id,
                buy_order_id,
                sell_order_id,
                reference,
            } => {
                self.reconcile(trade_id, *buy_order_id, *sell_order_id, reference).await?;
                Ok(None)
            }
        }
    }
}
