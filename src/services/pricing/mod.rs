//! Multi-factor dynamic pricing.
//!
//! `P = base * clamp(F_sd * F_soc * F_dist * F_time * F_quality, min, max)` where
//!
//! - `F_sd = max(0, 1 + alpha * ln(demand / supply))` (supply and demand floored first)
//! - `F_soc = 1 + beta * (1 - soc)^2`
//! - `F_dist = 1 + gamma * distance`
//! - `F_time` from configured wall-clock windows
//! - `F_quality = 1 + eta * q_score` (1.0 without quality history)

pub mod time_of_day;

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::env_or;
use crate::database::repository::{PricingAuditSink, QualityRepository};
use crate::middleware::metrics::track_pricing_multiplier;
use crate::models::PricingBreakdown;

pub use time_of_day::TimeWindow;

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub base_price: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub eta: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub demand_floor: f64,
    pub supply_floor: f64,
    pub time_windows: Vec<TimeWindow>,
    pub timezone_offset_hours: i32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_price: 5.0,
            alpha: 0.2,
            beta: 0.5,
            gamma: 0.2,
            eta: 0.1,
            min_multiplier: 0.5,
            max_multiplier: 5.0,
            demand_floor: 0.1,
            supply_floor: 1.0,
            time_windows: time_of_day::default_windows(),
            timezone_offset_hours: 0,
        }
    }
}

impl PricingConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let mut time_windows = Vec::with_capacity(3);
        for (key, fallback) in [
            ("PRICING_EVENING_PEAK", defaults.time_windows[0]),
            ("PRICING_MORNING_PEAK", defaults.time_windows[1]),
            ("PRICING_NIGHT_TROUGH", defaults.time_windows[2]),
        ] {
            let window = match std::env::var(key) {
                Ok(raw) => raw
                    .parse::<TimeWindow>()
                    .with_context(|| format!("invalid {}", key))?,
                Err(_) => fallback,
            };
            time_windows.push(window);
        }

        let config = Self {
            base_price: env_or("PRICING_BASE_PRICE", defaults.base_price),
            alpha: env_or("PRICING_ALPHA", defaults.alpha),
            beta: env_or("PRICING_BETA", defaults.beta),
            gamma: env_or("PRICING_GAMMA", defaults.gamma),
            eta: env_or("PRICING_ETA", defaults.eta),
            min_multiplier: env_or("PRICING_MIN_MULTIPLIER", defaults.min_multiplier),
            max_multiplier: env_or("PRICING_MAX_MULTIPLIER", defaults.max_multiplier),
            demand_floor: env_or("PRICING_DEMAND_FLOOR", defaults.demand_floor),
            supply_floor: env_or("PRICING_SUPPLY_FLOOR", defaults.supply_floor),
            time_windows,
            timezone_offset_hours: env_or("PRICING_TIMEZONE_OFFSET_HOURS", defaults.timezone_offset_hours),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.min_multiplier > 0.0 && self.min_multiplier <= self.max_multiplier) {
            bail!(
                "PRICING_MIN_MULTIPLIER ({}) must be positive and not above PRICING_MAX_MULTIPLIER ({})",
                self.min_multiplier,
                self.max_multiplier
            );
        }
        if self.base_price <= 0.0 {
            bail!("PRICING_BASE_PRICE must be positive");
        }
        if self.demand_floor <= 0.0 || self.supply_floor <= 0.0 {
            bail!("PRICING_DEMAND_FLOOR and PRICING_SUPPLY_FLOOR must be positive");
        }
        if self.alpha < 0.0 || self.beta < 0.0 || self.gamma < 0.0 || self.eta < 0.0 {
            bail!("pricing coefficients must not be negative");
        }
        Ok(())
    }
}

/// Market and physical signals for one price calculation.
#[derive(Debug, Clone)]
pub struct PricingInput {
    pub seller_id: Option<Uuid>,
    /// Overrides the configured base price (the matcher passes the seller's ask)
    pub base_price: Option<f64>,
    pub supply: f64,
    pub demand: f64,
    pub soc: f64,
    pub distance: f64,
    pub at: DateTime<Utc>,
}

impl PricingConfig {
    pub fn supply_demand_factor(&self, supply: f64, demand: f64) -> f64 {
        let supply = if supply.is_finite() { supply.max(self.supply_floor) } else { self.supply_floor };
        let demand = if demand.is_finite() { demand.max(self.demand_floor) } else { self.demand_floor };
        (1.0 + self.alpha * (demand / supply).ln()).max(0.0)
    }

    pub fn scarcity_factor(&self, soc: f64) -> f64 {
        let soc = if soc.is_finite() { soc.clamp(0.0, 1.0) } else { 0.5 };
        let deficit = 1.0 - soc;
        1.0 + self.beta * deficit * deficit
    }

    pub fn distance_factor(&self, distance: f64) -> f64 {
        let distance = if distance.is_finite() { distance.max(0.0) } else { 0.0 };
        1.0 + self.gamma * distance
    }

    pub fn time_factor(&self, at: DateTime<Utc>) -> f64 {
        let hour = time_of_day::local_hour(at, self.timezone_offset_hours);
        time_of_day::factor_for_hour(&self.time_windows, hour)
    }

    pub fn quality_factor(&self, q_score: Option<f64>) -> f64 {
        match q_score {
            Some(q) if q.is_finite() => 1.0 + self.eta * q.clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    pub fn clamp_multiplier(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            return self.min_multiplier;
        }
        raw.clamp(self.min_multiplier, self.max_multiplier)
    }

    /// Pure price calculation given the seller's quality score, if any.
    pub fn breakdown(&self, input: &PricingInput, q_score: Option<f64>) -> PricingBreakdown {
        let base_price = input
            .base_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(self.base_price);

        let f_sd = self.supply_demand_factor(input.supply, input.demand);
        let f_soc = self.scarcity_factor(input.soc);
        let f_dist = self.distance_factor(input.distance);
        let f_time = self.time_factor(input.at);
        let f_quality = self.quality_factor(q_score);

        let raw_multiplier = f_sd * f_soc * f_dist * f_time * f_quality;
        let multiplier = self.clamp_multiplier(raw_multiplier);

        PricingBreakdown {
            seller_id: input.seller_id,
            base_price,
            f_sd,
            f_soc,
            f_dist,
            f_time,
            f_quality,
            q_score,
            raw_multiplier,
            multiplier,
            final_price: base_price * multiplier,
            grid_soc: input.soc,
            total_supply: input.supply,
            total_demand: input.demand,
            distance: input.distance,
            calculated_at: input.at,
        }
    }
}

/// Pricing model with the seller-quality lookup and the audit trail attached.
#[derive(Clone)]
pub struct PricingEngine {
    config: Arc<PricingConfig>,
    quality: Arc<dyn QualityRepository>,
    audit: Arc<dyn PricingAuditSink>,
}

impl PricingEngine {
    pub fn new(
        config: PricingConfig,
        quality: Arc<dyn QualityRepository>,
        audit: Arc<dyn PricingAuditSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            quality,
            audit,
        }
    }

    /// Computes the price and its breakdown. Never fails: a quality lookup
    /// error prices the seller as having no history, and the audit write runs
    /// detached from the caller.
    pub async fn calculate(&self, input: &PricingInput) -> PricingBreakdown {
        let q_score = match input.seller_id {
            Some(seller_id) => match self.quality.get(seller_id).await {
                Ok(metrics) => metrics.map(|m| m.q_score()),
                Err(e) => {
                    warn!("Quality lookup failed for seller {}: {}", seller_id, e);
                    None
                }
            },
            None => None,
        };

        let breakdown = self.config.breakdown(input, q_score);
        track_pricing_multiplier(breakdown.multiplier, breakdown.was_clamped());
        debug!(
            "Price {:.4} = {:.4} x {:.4} (sd={:.4} soc={:.4} dist={:.4} time={:.2} q={:.4})",
            breakdown.final_price,
            breakdown.base_price,
            breakdown.multiplier,
            breakdown.f_sd,
            breakdown.f_soc,
            breakdown.f_dist,
            breakdown.f_time,
            breakdown.f_quality
        );

        let audit = self.audit.clone();
        let entry = breakdown.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.append(&entry).await {
                warn!("Failed to append pricing audit entry: {}", e);
            }
        });

        breakdown
    }
}
