use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::repository::{DeviceRepository, OrderRepository};
use crate::database::schema::types::{OrderSide, OrderStatus};
use crate::error::{ApiError, ErrorCode, Result};
use crate::middleware::metrics::track_order_created;
use crate::models::trading::CreateOrderRequest;
use crate::models::EnergyOrder;
use crate::services::reserve_proof::ReserveProver;

/// Order lifecycle operations available to request handlers. The matcher and
/// the settlement path move orders only through the same guarded transitions.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    devices: Arc<dyn DeviceRepository>,
    reserve: Option<ReserveRequirement>,
    lock_device_type: String,
}

#[derive(Clone)]
struct ReserveRequirement {
    prover: Arc<dyn ReserveProver>,
    min_soc: f64,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        devices: Arc<dyn DeviceRepository>,
        lock_device_type: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            devices,
            reserve: None,
            lock_device_type: lock_device_type.into(),
        }
    }

    /// Require sellers to prove `battery >= min_soc` before listing.
    pub fn with_reserve_proofs(mut self, prover: Arc<dyn ReserveProver>, min_soc: f64) -> Self {
        self.reserve = Some(ReserveRequirement { prover, min_soc });
        self
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<EnergyOrder> {
        if request.kwh_amount <= Decimal::ZERO {
            return Err(ApiError::with_code(
                ErrorCode::InvalidAmount,
                "kwh_amount must be greater than zero",
            ));
        }
        if request.token_price <= Decimal::ZERO {
            return Err(ApiError::with_code(
                ErrorCode::InvalidAmount,
                "token_price must be greater than zero",
            ));
        }

        if request.side == OrderSide::Sell {
            self.check_reserve(request.user_id).await?;
        }

        let order = EnergyOrder::new(
            request.user_id,
            request.side,
            request.kwh_amount,
            request.token_price,
        );
        let order = self.orders.create(&order).await?;

        track_order_created(order.side.as_str());
        info!(
            "📝 Order {} created: {} {} kWh @ {}",
            order.id,
            order.side.as_str(),
            order.kwh_amount,
            order.token_price
        );
        Ok(order)
    }

    async fn check_reserve(&self, user_id: Uuid) -> Result<()> {
        let Some(reserve) = &self.reserve else {
            return Ok(());
        };

        let battery_level = self
            .devices
            .find_lock_capable(user_id, &self.lock_device_type)
            .await?
            .and_then(|d| d.battery_level)
            .ok_or_else(|| {
                ApiError::with_code(
                    ErrorCode::ReserveProofRejected,
                    "No battery telemetry available to prove reserve",
                )
            })?;

        let proof = reserve
            .prover
            .prove(battery_level, reserve.min_soc)
            .map_err(|e| ApiError::with_code(ErrorCode::ReserveProofRejected, e.to_string()))?;

        if !reserve.prover.verify(&proof) {
            warn!("Reserve proof for {} failed verification", user_id);
            return Err(ApiError::with_code(
                ErrorCode::ReserveProofRejected,
                "Reserve proof failed verification",
            ));
        }
        Ok(())
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<EnergyOrder> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Order"))
    }

    /// Owner-only, and only while the order is still `Created`.
    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<EnergyOrder> {
        let order = self.get_order(order_id).await?;
        if order.user_id != user_id {
            return Err(ApiError::Forbidden(
                "Only the order owner can cancel it".to_string(),
            ));
        }
        if !order.is_open() {
            return Err(ApiError::order_not_open(order_id));
        }

        let cancelled = self
            .orders
            .transition(order_id, OrderStatus::Created, OrderStatus::Cancelled)
            .await?;
        if !cancelled {
            return Err(ApiError::Conflict(format!(
                "Order {} changed state before it could be cancelled",
                order_id
            )));
        }

        info!("🚫 Order {} cancelled by owner", order_id);
        Ok(EnergyOrder {
            status: OrderStatus::Cancelled,
            ..order
        })
    }

    /// `Matched -> Completed`, once the trade is final on the ledger.
    pub async fn complete_order(&self, order_id: Uuid) -> Result<()> {
        let completed = self
            .orders
            .transition(order_id, OrderStatus::Matched, OrderStatus::Completed)
            .await?;
        if !completed {
            return Err(ApiError::Conflict(format!(
                "Order {} is not in Matched status",
                order_id
            )));
        }
        Ok(())
    }
}
