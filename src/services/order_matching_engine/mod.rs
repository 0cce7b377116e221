//! Periodic double-auction matcher.
//!
//! Each cycle snapshots the open book, prices every sell order against the
//! current market state and pairs it with the best-priced buy order of the
//! same quantity whose limit covers the settlement price. The snapshot is only
//! advisory: the status-guarded write in `SettlementCoordinator::settle` is the
//! sole atomicity boundary.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::env_or;
use crate::database::repository::OrderRepository;
use crate::database::schema::types::OrderSide;
use crate::middleware::metrics::{track_matching_cycle, track_settlement_failure};
use crate::models::{EnergyOrder, PriceQuote, PricingBreakdown};
use crate::services::community_state::CommunityStateEstimator;
use crate::services::pricing::{PricingEngine, PricingInput};
use crate::services::settlement::{settlement_unit_price, SettlementCoordinator};

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub interval: Duration,
    /// Distance used for every pair while orders carry no location
    pub nominal_distance: f64,
    pub enabled: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            nominal_distance: 1.0,
            enabled: true,
        }
    }
}

impl MatchingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval_secs: u64 = env_or("MATCHING_INTERVAL_SECS", 5u64).max(1);
        if interval_secs != 5 {
            info!("Order matching interval set to {} seconds", interval_secs);
        }

        Self {
            interval: Duration::from_secs(interval_secs),
            nominal_distance: env_or("MATCHING_NOMINAL_DISTANCE", defaults.nominal_distance).max(0.0),
            enabled: env_or("MATCHING_ENABLED", defaults.enabled),
        }
    }
}

/// Outcome of one matching cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub sell_orders: usize,
    pub buy_orders: usize,
    pub community_soc: Option<f64>,
    pub matches: usize,
    pub failed_settlements: usize,
}

/// Background service that pairs open buy and sell orders
#[derive(Clone)]
pub struct OrderMatchingEngine {
    orders: Arc<dyn OrderRepository>,
    estimator: CommunityStateEstimator,
    pricing: PricingEngine,
    settlement: SettlementCoordinator,
    config: MatchingConfig,
    running: Arc<RwLock<bool>>,
    /// Bumped by every `start`; a loop exits once it no longer owns the
    /// current generation.
    generation: Arc<AtomicU64>,
    /// Held for the whole of a cycle so cycles never overlap, even across a
    /// stop/start that outlives the previous loop's in-flight cycle.
    cycle_lock: Arc<Mutex<()>>,
}

impl OrderMatchingEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        estimator: CommunityStateEstimator,
        pricing: PricingEngine,
        settlement: SettlementCoordinator,
        config: MatchingConfig,
    ) -> Self {
        Self {
            orders,
            estimator,
            pricing,
            settlement,
            config,
            running: Arc::new(RwLock::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Start the background matching loop
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Order matching engine is already running");
            return;
        }
        *running = true;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(running);

        info!(
            "🚀 Starting automated order matching engine (interval: {:?})",
            self.config.interval
        );

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_matching_loop(generation).await;
        });
    }

    /// Stop the background matching loop after the current cycle
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("⏹️  Stopped automated order matching engine");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Cycles run back to back on one task, so a slow cycle delays the next
    /// tick instead of overlapping it.
    async fn run_matching_loop(&self, generation: u64) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.owns_generation(generation).await {
                break;
            }

            let started = Instant::now();
            let outcome = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            match outcome {
                Ok(Ok(report)) => {
                    track_matching_cycle(started.elapsed(), report.matches, true);
                    if report.matches > 0 {
                        info!(
                            "✅ Matching cycle completed: {} trade(s), {} failed settlement(s)",
                            report.matches, report.failed_settlements
                        );
                    } else {
                        debug!("Matching cycle completed: no new matches");
                    }
                }
                Ok(Err(e)) => {
                    track_matching_cycle(started.elapsed(), 0, false);
                    error!("❌ Error in matching cycle: {}", e);
                }
                Err(_) => {
                    track_matching_cycle(started.elapsed(), 0, false);
                    error!("❌ Matching cycle panicked, continuing with next tick");
                }
            }
        }

        info!("Order matching loop {} terminated", generation);
    }

    async fn owns_generation(&self, generation: u64) -> bool {
        let running = self.running.read().await;
        *running && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Runs one matching cycle against a fresh snapshot of the book.
    ///
    /// Store errors while snapshotting abort the cycle; a pair that fails to
    /// settle is logged and scanning continues.
    #[instrument(skip(self), name = "matching_cycle")]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;
        let sells = self.orders.find_open(OrderSide::Sell).await?;
        let buys = self.orders.find_open(OrderSide::Buy).await?;

        let mut report = CycleReport {
            sell_orders: sells.len(),
            buy_orders: buys.len(),
            ..CycleReport::default()
        };
        if sells.is_empty() || buys.is_empty() {
            return Ok(report);
        }

        let supply = sells.len() as f64;
        let demand = buys.len() as f64;
        let soc = self.estimator.estimate_soc().await;
        report.community_soc = Some(soc);
        let at = Utc::now();

        debug!("Market state: supply={} demand={} soc={:.3}", supply, demand, soc);

        let mut consumed: HashSet<Uuid> = HashSet::new();

        for sell in &sells {
            if consumed.contains(&sell.id) {
                continue;
            }

            // The price depends only on the seller and the cycle's market state,
            // so every buyer in this pass is quoted the same settlement price.
            let mut pricing: Option<PricingBreakdown> = None;

            for buy in &buys {
                if consumed.contains(&buy.id) {
                    continue;
                }
                if buy.kwh_amount != sell.kwh_amount {
                    continue;
                }

                let breakdown = match &pricing {
                    Some(b) => b.clone(),
                    None => {
                        let b = self
                            .pricing
                            .calculate(&PricingInput {
                                seller_id: Some(sell.user_id),
                                base_price: sell.token_price.to_f64(),
                                supply,
                                demand,
                                soc,
                                distance: self.config.nominal_distance,
                                at,
                            })
                            .await;
                        pricing = Some(b.clone());
                        b
                    }
                };

                if !limit_covers(buy, &breakdown) {
                    continue;
                }

                debug!(
                    "Candidate pair: sell {} (ask {}) / buy {} (limit {}) at {:.6}",
                    sell.id, sell.token_price, buy.id, buy.token_price, breakdown.final_price
                );

                match self.settlement.settle(buy, sell, &breakdown).await {
                    Ok(trade) => {
                        consumed.insert(sell.id);
                        consumed.insert(buy.id);
                        report.matches += 1;
                        info!(
                            "Match found: buy {} / sell {} at {} (ask {})",
                            buy.id, sell.id, trade.unit_price, sell.token_price
                        );
                        break;
                    }
                    Err(e) => {
                        report.failed_settlements += 1;
                        let reason = if e.is_conflict() { "conflict" } else { "store" };
                        track_settlement_failure(reason);
                        warn!(
                            "Settlement of buy {} / sell {} failed ({}): {}",
                            buy.id, sell.id, reason, e
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Current estimated price without matching anything. Uses the lowest open
    /// ask as the base price, or the configured base price on an empty book.
    pub async fn quote_price(&self) -> crate::error::Result<PriceQuote> {
        let supply = self.orders.count_open(OrderSide::Sell).await?;
        let demand = self.orders.count_open(OrderSide::Buy).await?;
        let best_ask = self.orders.best_open(OrderSide::Sell).await?;
        let soc = self.estimator.estimate_soc().await;

        let breakdown = self
            .pricing
            .calculate(&PricingInput {
                seller_id: best_ask.as_ref().map(|o| o.user_id),
                base_price: best_ask.as_ref().and_then(|o| o.token_price.to_f64()),
                supply: supply as f64,
                demand: demand as f64,
                soc,
                distance: self.config.nominal_distance,
                at: Utc::now(),
            })
            .await;

        Ok(PriceQuote {
            price: breakdown.final_price,
            supply,
            demand,
            community_soc: soc,
            timestamp: breakdown.calculated_at,
            breakdown,
        })
    }
}

fn limit_covers(buy: &EnergyOrder, pricing: &PricingBreakdown) -> bool {
    match settlement_unit_price(pricing.final_price) {
        Some(price) => buy.token_price >= price,
        None => false,
    }
}
