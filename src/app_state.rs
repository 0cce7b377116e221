//! Application state shared across all handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::database::repository::{TradeRepository, YieldRepository};
use crate::services::{
    OrderMatchingEngine, OrderService, SideEffectTask, TaskQueue, TelemetrySimulator,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Order creation and owner cancellation
    pub orders: OrderService,
    /// Background matcher; handlers only use its price quote
    pub matching_engine: OrderMatchingEngine,
    pub trades: Arc<dyn TradeRepository>,
    pub yields: Arc<dyn YieldRepository>,
    /// Settlement side-effect queue, drained on shutdown
    pub side_effects: Arc<TaskQueue<SideEffectTask>>,
    /// Demo telemetry feed, present only when simulation is enabled
    pub simulator: Option<TelemetrySimulator>,
    /// `None` when another recorder was already installed (tests)
    pub metrics_handle: Option<PrometheusHandle>,
}

