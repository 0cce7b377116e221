use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
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

const ORDER_COLUMNS: &str = "id, user_id, side, kwh_amount, token_price, status, created_at";

const TRADE_COLUMNS: &str = "id, buy_order_id, sell_order_id, donor_id, recipient_id, kwh_amount, \
     token_amount, unit_price, ledger_reference, status, created_at, confirmed_at";

/// Postgres-backed market store. All status writes are guarded updates.
#[derive(Clone)]
pub struct PgMarketStore {
    db: PgPool,
}

impl PgMarketStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn open_ordering(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Sell => "token_price ASC, created_at ASC",
        OrderSide::Buy => "token_price DESC, created_at ASC",
    }
}

#[async_trait]
impl OrderRepository for PgMarketStore {
    async fn create(&self, order: &EnergyOrder) -> Result<EnergyOrder> {
        let query = format!(
            "INSERT INTO energy_orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {ORDER_COLUMNS}"
        );
        let stored = sqlx::query_as::<_, EnergyOrder>(&query)
            .bind(order.id)
            .bind(order.user_id)
            .bind(order.side)
            .bind(order.kwh_amount)
            .bind(order.token_price)
            .bind(order.status)
            .bind(order.created_at)
            .fetch_one(&self.db)
            .await?;
        Ok(stored)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EnergyOrder>> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM energy_orders WHERE id = $1");
        let order = sqlx::query_as::<_, EnergyOrder>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(order)
    }

    async fn find_open(&self, side: OrderSide) -> Result<Vec<EnergyOrder>> {
        let ordering = open_ordering(side);
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM energy_orders \
             WHERE side = $1 AND status = 'created'::order_status ORDER BY {ordering}"
        );
        let orders = sqlx::query_as::<_, EnergyOrder>(&query)
            .bind(side)
            .fetch_all(&self.db)
            .await?;
        Ok(orders)
    }

    async fn best_open(&self, side: OrderSide) -> Result<Option<EnergyOrder>> {
        let ordering = open_ordering(side);
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM energy_orders \
             WHERE side = $1 AND status = 'created'::order_status ORDER BY {ordering} LIMIT 1"
        );
        let order = sqlx::query_as::<_, EnergyOrder>(&query)
            .bind(side)
            .fetch_optional(&self.db)
            .await?;
        Ok(order)
    }

    async fn count_open(&self, side: OrderSide) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM energy_orders WHERE side = $1 AND status = 'created'::order_status",
        )
        .bind(side)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            debug!("Order {} {} -> {}: not a valid edge", id, from, to);
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE energy_orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.db)
        .await?;

        debug!("Order {} {} -> {}: {} row(s)", id, from, to, result.rows_affected());
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl TradeRepository for PgMarketStore {
    async fn create(&self, trade: &TradeRecord) -> Result<()> {
        insert_trade(&self.db, trade).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TradeRecord>> {
        let query = format!("SELECT {TRADE_COLUMNS} FROM trade_records WHERE id = $1");
        let trade = sqlx::query_as::<_, TradeRecord>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(trade)
    }

    async fn find_by_user(
        &self,
        user_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TradeRecord>> {
        let query = format!(
            "SELECT {TRADE_COLUMNS} FROM trade_records \
             WHERE (donor_id = $1 OR recipient_id = $1) \
             AND ($2::timestamptz IS NULL OR created_at >= $2) \
             AND ($3::timestamptz IS NULL OR created_at <= $3) \
             ORDER BY created_at DESC"
        );
        let trades = sqlx::query_as::<_, TradeRecord>(&query)
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.db)
            .await?;
        Ok(trades)
    }

    async fn record_ledger_outcome(
        &self,
        trade_id: &str,
        reference: &str,
        status: TradeStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trade_records
            SET status = $3,
                ledger_reference = $2,
                confirmed_at = CASE WHEN $3 = 'confirmed'::trade_status THEN NOW() ELSE confirmed_at END
            WHERE id = $1 AND status = 'pending'::trade_status
            "#,
        )
        .bind(trade_id)
        .bind(reference)
        .bind(status)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

async fn insert_trade<'e, E>(executor: E, trade: &TradeRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let query = format!(
        "INSERT INTO trade_records ({TRADE_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    );
    sqlx::query(&query)
        .bind(&trade.id)
        .bind(trade.buy_order_id)
        .bind(trade.sell_order_id)
        .bind(trade.donor_id)
        .bind(trade.recipient_id)
        .bind(trade.kwh_amount)
        .bind(trade.token_amount)
        .bind(trade.unit_price)
        .bind(&trade.ledger_reference)
        .bind(trade.status)
        .bind(trade.created_at)
        .bind(trade.confirmed_at)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl SettlementStore for PgMarketStore {
    async fn commit_match(&self, buy_order_id: Uuid, sell_order_id: Uuid, trade: &TradeRecord) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for id in [buy_order_id, sell_order_id] {
            let result = sqlx::query(
                "UPDATE energy_orders SET status = 'matched'::order_status, updated_at = NOW() \
                 WHERE id = $1 AND status = 'created'::order_status",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                tx.rollback().await?;
                return Err(ApiError::Conflict(format!("Order {} is no longer open", id)));
            }
        }

        if let Err(e) = insert_trade(&mut *tx, trade).await {
            tx.rollback().await?;
            return Err(match e {
                ApiError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    ApiError::Conflict(format!("Trade {} already exists", trade.id))
                }
                other => other,
            });
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for PgMarketStore {
    async fn list_all(&self) -> Result<Vec<DeviceTelemetry>> {
        let devices = sqlx::query_as::<_, DeviceTelemetry>(
            "SELECT id, owner_id, device_type, battery_level, status, last_ping FROM device_telemetry",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(devices)
    }

    async fn find_lock_capable(&self, owner_id: Uuid, device_type: &str) -> Result<Option<DeviceTelemetry>> {
        let device = sqlx::query_as::<_, DeviceTelemetry>(
            "SELECT id, owner_id, device_type, battery_level, status, last_ping FROM device_telemetry \
             WHERE owner_id = $1 AND device_type = $2 ORDER BY last_ping DESC NULLS LAST LIMIT 1",
        )
        .bind(owner_id)
        .bind(device_type)
        .fetch_optional(&self.db)
        .await?;
        Ok(device)
    }

    async fn upsert(&self, device: &DeviceTelemetry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_telemetry (id, owner_id, device_type, battery_level, status, last_ping)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                device_type = EXCLUDED.device_type,
                battery_level = EXCLUDED.battery_level,
                status = EXCLUDED.status,
                last_ping = EXCLUDED.last_ping
            "#,
        )
        .bind(&device.id)
        .bind(device.owner_id)
        .bind(&device.device_type)
        .bind(device.battery_level)
        .bind(&device.status)
        .bind(device.last_ping)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_battery_level(&self, device_id: &str, level: f64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE device_telemetry SET battery_level = $2, last_ping = NOW() WHERE id = $1",
        )
        .bind(device_id)
        .bind(level)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("Device"));
        }
        Ok(())
    }
}

#[async_trait]
impl QualityRepository for PgMarketStore {
    async fn get(&self, owner_id: Uuid) -> Result<Option<DeviceQualityMetrics>> {
        let metrics = sqlx::query_as::<_, DeviceQualityMetrics>(
            "SELECT owner_id, device_id, successful_deliveries, total_deliveries, voltage_stability, \
             battery_health_score, last_updated FROM device_quality_metrics WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(metrics)
    }
}

#[async_trait]
impl PricingAuditSink for PgMarketStore {
    async fn append(&self, b: &PricingBreakdown) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pricing_audit (
                seller_id, base_price, f_sd, f_soc, f_dist, f_time, f_quality, q_score,
                raw_multiplier, multiplier, final_price, grid_soc,
                total_supply, total_demand, distance, calculated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(b.seller_id)
        .bind(b.base_price)
        .bind(b.f_sd)
        .bind(b.f_soc)
        .bind(b.f_dist)
        .bind(b.f_time)
        .bind(b.f_quality)
        .bind(b.q_score)
        .bind(b.raw_multiplier)
        .bind(b.multiplier)
        .bind(b.final_price)
        .bind(b.grid_soc)
        .bind(b.total_supply)
        .bind(b.total_demand)
        .bind(b.distance)
        .bind(b.calculated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl YieldRepository for PgMarketStore {
    async fn append(&self, record: &YieldRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO yield_records (id, user_id, amount, source, trade_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.amount)
        .bind(&record.source)
        .bind(&record.trade_id)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<YieldRecord>> {
        let records = sqlx::query_as::<_, YieldRecord>(
            "SELECT id, user_id, amount, source, trade_id, created_at FROM yield_records \
             WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }
}
