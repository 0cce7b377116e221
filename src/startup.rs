//! Application startup and initialization logic.
//!
//! Builds the stores, capabilities and services from `Config` and wires them
//! into `AppState`. Every collaborator is constructed here and injected; no
//! service reaches for a global connection.

use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::config::{Config, StorageBackend};
use crate::database::{self, InMemoryMarketStore, MarketStores, PgMarketStore};
use crate::services::{
    device_command, ledger, reserve_proof, CommunityStateEstimator, OrderMatchingEngine,
    OrderService, PricingEngine, SettlementCoordinator, SideEffectExecutor, SideEffectTask,
    TaskQueue, TelemetrySimulator,
};

/// Initialize storage and metrics, then create the AppState.
pub async fn initialize_app(config: &Config) -> Result<AppState> {
    info!("🚀 Starting energy market engine ({})", config.environment);

    let metrics_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("✅ Prometheus metrics initialized");
            Some(handle)
        }
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    let stores = setup_storage(config).await?;
    build_state(config, stores, metrics_handle)
}

async fn setup_storage(config: &Config) -> Result<MarketStores> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for postgres storage"))?;
            let pool = database::setup_database(url, config.storage.max_connections).await?;
            info!("✅ PostgreSQL connection established");

            database::run_migrations(&pool).await?;
            info!("✅ Database migrations completed");

            Ok(MarketStores::from_store(PgMarketStore::new(pool)))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; orders and trades are lost on restart");
            Ok(MarketStores::from_store(InMemoryMarketStore::new()))
        }
    }
}

/// Wire services over already-open stores. Spawns the side-effect workers on
/// the current runtime but starts no background loop.
pub fn build_state(
    config: &Config,
    stores: MarketStores,
    metrics_handle: Option<PrometheusHandle>,
) -> Result<AppState> {
    let ledger_client = ledger::build_ledger_client(&config.ledger)?;
    let commander = device_command::build_device_commander(&config.device)?;

    let mut orders = OrderService::new(
        stores.orders.clone(),
        stores.devices.clone(),
        config.device.lock_device_type.clone(),
    );
    if let Some(prover) = reserve_proof::build_reserve_prover(&config.reserve_proof) {
        orders = orders.with_reserve_proofs(prover, config.reserve_proof.min_soc);
    }
    info!("✅ Order service initialized");

    let yield_rate = Decimal::from_f64(config.settlement.yield_rate)
        .ok_or_else(|| anyhow::anyhow!("SETTLEMENT_YIELD_RATE is not a usable number"))?;
    let executor = SideEffectExecutor {
        devices: stores.devices.clone(),
        commander,
        yields: stores.yields.clone(),
        ledger: ledger_client,
        trades: stores.trades.clone(),
        orders: orders.clone(),
        lock_device_type: config.device.lock_device_type.clone(),
        yield_rate,
        yield_source: config.settlement.yield_source.clone(),
    };
    let side_effects =
        TaskQueue::<SideEffectTask>::start(config.task_queue.clone(), Arc::new(executor));

    let settlement = SettlementCoordinator::new(
        stores.settlement.clone(),
        side_effects.clone(),
        config.settlement.clone(),
    );
    info!(
        "✅ Settlement coordinator initialized (yield rate {})",
        config.settlement.yield_rate
    );

    let pricing = PricingEngine::new(
        config.pricing.clone(),
        stores.quality.clone(),
        stores.audit.clone(),
    );
    info!(
        "✅ Pricing engine initialized (base {}, alpha {}, beta {}, gamma {})",
        config.pricing.base_price, config.pricing.alpha, config.pricing.beta, config.pricing.gamma
    );

    let matching_engine = OrderMatchingEngine::new(
        stores.orders.clone(),
        CommunityStateEstimator::new(stores.devices.clone()),
        pricing,
        settlement,
        config.matching.clone(),
    );
    info!("✅ Order matching engine initialized");

    let simulator = config.simulation.enabled.then(|| {
        TelemetrySimulator::new(
            stores.devices.clone(),
            config.simulation.clone(),
            config.device.lock_device_type.clone(),
        )
    });

    Ok(AppState {
        config: config.clone(),
        orders,
        matching_engine,
        trades: stores.trades,
        yields: stores.yields,
        side_effects,
        simulator,
        metrics_handle,
    })
}

/// Spawn background tasks.
pub async fn spawn_background_tasks(app_state: &AppState) {
    info!("📌 Spawning background tasks...");

    if let Some(simulator) = &app_state.simulator {
        simulator.start().await;
        info!("✅ Telemetry simulation started");
    }

    if app_state.config.matching.enabled {
        app_state.matching_engine.start().await;
        info!("✅ Order Matching Engine started");
    } else {
        warn!("MATCHING_ENABLED=false, order matching is paused");
    }
}

/// Stop matching and let queued side effects finish.
pub async fn shutdown(app_state: &AppState) {
    app_state.matching_engine.stop().await;
    app_state.side_effects.shutdown().await;
    info!("Shutdown complete");
}

/// Wait for shutdown signal.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully");
        },
    }
}
