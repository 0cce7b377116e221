use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five multiplicative factors behind one price calculation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingBreakdown {
    pub seller_id: Option<Uuid>,
    pub base_price: f64,
    pub f_sd: f64,
    pub f_soc: f64,
    pub f_dist: f64,
    pub f_time: f64,
    pub f_quality: f64,
    /// Seller's composite delivery-quality score, `None` without history
    pub q_score: Option<f64>,
    /// Product of the factors before clamping
    pub raw_multiplier: f64,
    /// Multiplier actually applied to the base price
    pub multiplier: f64,
    pub final_price: f64,
    pub grid_soc: f64,
    pub total_supply: f64,
    pub total_demand: f64,
    pub distance: f64,
    pub calculated_at: DateTime<Utc>,
}

impl PricingBreakdown {
    pub fn was_clamped(&self) -> bool {
        (self.raw_multiplier - self.multiplier).abs() > f64::EPSILON
    }
}

/// Current estimated price for display, computed without matching.
#[derive(Debug, Clone, Serialize)]
pub struct PriceQuote {
    pub price: f64,
    pub supply: i64,
    pub demand: i64,
    pub community_soc: f64,
    pub timestamp: DateTime<Utc>,
    pub breakdown: PricingBreakdown,
}
