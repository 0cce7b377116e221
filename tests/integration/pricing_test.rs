// Pricing engine integration tests
// Covers the engine with its quality lookup and audit trail attached, plus
// property checks on the multiplier bounds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use energy_market_engine::database::repository::{PricingAuditSink, QualityRepository};
use energy_market_engine::database::InMemoryMarketStore;
use energy_market_engine::error::{ApiError, Result as StoreResult};
use energy_market_engine::models::{DeviceQualityMetrics, PricingBreakdown};
use energy_market_engine::services::{PricingConfig, PricingEngine, PricingInput};

fn at_hour(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn market(supply: f64, demand: f64) -> PricingInput {
    PricingInput {
        seller_id: None,
        base_price: None,
        supply,
        demand,
        soc: 0.5,
        distance: 0.0,
        at: at_hour(12),
    }
}

struct BrokenAuditSink;

#[async_trait]
impl PricingAuditSink for BrokenAuditSink {
    async fn append(&self, _breakdown: &PricingBreakdown) -> StoreResult<()> {
        Err(ApiError::Internal("audit table is read-only".to_string()))
    }
}

struct BrokenQualityStore;

#[async_trait]
impl QualityRepository for BrokenQualityStore {
    async fn get(&self, _owner_id: Uuid) -> StoreResult<Option<DeviceQualityMetrics>> {
        Err(ApiError::ExternalService("quality history offline".to_string()))
    }
}

fn engine_over(store: &InMemoryMarketStore) -> PricingEngine {
    PricingEngine::new(
        PricingConfig::default(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
}

async fn wait_for_audit(store: &InMemoryMarketStore, count: usize) -> Vec<PricingBreakdown> {
    for _ in 0..100 {
        let entries = store.audit_entries().await;
        if entries.len() >= count {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    store.audit_entries().await
}

#[tokio::test]
async fn test_balanced_market_prices_at_base_times_scarcity() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let breakdown = engine_over(&store).calculate(&market(1.0, 1.0)).await;

    assert!((breakdown.multiplier - 1.125).abs() < 1e-12);
    assert!((breakdown.final_price - 5.625).abs() < 1e-9);
    assert!(!breakdown.was_clamped());
    Ok(())
}

#[tokio::test]
async fn test_excess_demand_prices_higher() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let breakdown = engine_over(&store).calculate(&market(1.0, 5.0)).await;

    assert!((breakdown.f_sd - (1.0 + 0.2 * 5f64.ln())).abs() < 1e-12);
    assert!((breakdown.final_price - 7.436).abs() < 1e-3);
    assert!(breakdown.final_price >= 2.5 && breakdown.final_price <= 25.0);
    Ok(())
}

#[tokio::test]
async fn test_flooded_market_never_reports_negative_factors() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let breakdown = engine_over(&store).calculate(&market(200.0, 1.0)).await;

    assert_eq!(breakdown.f_sd, 0.0);
    assert!(breakdown.raw_multiplier >= 0.0);
    assert_eq!(breakdown.multiplier, 0.5);
    assert!((breakdown.final_price - 2.5).abs() < 1e-9);

    let audited = wait_for_audit(&store, 1).await;
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].f_sd, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_every_calculation_is_audited() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let engine = engine_over(&store);

    engine.calculate(&market(1.0, 1.0)).await;
    engine.calculate(&market(1.0, 5.0)).await;

    let entries = wait_for_audit(&store, 2).await;
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| (e.total_demand - 5.0).abs() < f64::EPSILON));
    assert!(entries.iter().all(|e| (e.grid_soc - 0.5).abs() < f64::EPSILON));
    Ok(())
}

#[tokio::test]
async fn test_audit_failure_still_returns_price() -> Result<()> {
    let engine = PricingEngine::new(
        PricingConfig::default(),
        Arc::new(InMemoryMarketStore::new()),
        Arc::new(BrokenAuditSink),
    );

    let breakdown = engine.calculate(&market(1.0, 1.0)).await;
    assert!((breakdown.final_price - 5.625).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_seller_quality_history_raises_price() -> Result<()> {
    let store = InMemoryMarketStore::new();
    let seller = Uuid::new_v4();
    store.put_quality(DeviceQualityMetrics {
        owner_id: seller,
        device_id: "esp32_a".to_string(),
        successful_deliveries: 99,
        total_deliveries: 99,
        voltage_stability: 100.0,
        battery_health_score: 100.0,
        last_updated: Utc::now(),
    });
    let engine = engine_over(&store);

    let anonymous = engine.calculate(&market(1.0, 1.0)).await;
    let known = engine
        .calculate(&PricingInput {
            seller_id: Some(seller),
            ..market(1.0, 1.0)
        })
        .await;

    // q = 0.99 * 0.4 + 0.3 + 0.3
    assert!((known.f_quality - (1.0 + 0.1 * 0.996)).abs() < 1e-9);
    assert!(known.q_score.is_some_and(|q| (q - 0.996).abs() < 1e-9));
    assert!(known.final_price > anonymous.final_price);
    Ok(())
}

#[tokio::test]
async fn test_quality_lookup_failure_prices_without_history() -> Result<()> {
    let engine = PricingEngine::new(
        PricingConfig::default(),
        Arc::new(BrokenQualityStore),
        Arc::new(InMemoryMarketStore::new()),
    );

    let breakdown = engine
        .calculate(&PricingInput {
            seller_id: Some(Uuid::new_v4()),
            ..market(1.0, 1.0)
        })
        .await;
    assert_eq!(breakdown.f_quality, 1.0);
    assert!((breakdown.final_price - 5.625).abs() < 1e-9);
    Ok(())
}

proptest! {
    #[test]
    fn prop_multiplier_stays_within_bounds(
        supply in 0.0f64..1e6,
        demand in 0.0f64..1e6,
        soc in -1.0f64..2.0,
        distance in 0.0f64..1e4,
        hour in 0u32..24,
        q in proptest::option::of(0.0f64..1.0),
    ) {
        let config = PricingConfig::default();
        let breakdown = config.breakdown(
            &PricingInput {
                seller_id: None,
                base_price: None,
                supply,
                demand,
                soc,
                distance,
                at: at_hour(hour),
            },
            q,
        );

        prop_assert!(breakdown.multiplier >= 0.5);
        prop_assert!(breakdown.multiplier <= 5.0);
        prop_assert!(breakdown.final_price >= 2.5 - 1e-9);
        prop_assert!(breakdown.final_price <= 25.0 + 1e-9);
        prop_assert!(breakdown.final_price.is_finite());
        for factor in [
            breakdown.f_sd,
            breakdown.f_soc,
            breakdown.f_dist,
            breakdown.f_time,
            breakdown.f_quality,
            breakdown.raw_multiplier,
        ] {
            prop_assert!(factor >= 0.0, "negative factor in {:?}", breakdown);
        }
    }

    #[test]
    fn prop_more_demand_never_lowers_price(
        supply in 1.0f64..100.0,
        demand in 0.1f64..100.0,
        extra in 0.0f64..100.0,
    ) {
        let config = PricingConfig::default();
        let base = config.breakdown(&market(supply, demand), None);
        let busier = config.breakdown(&market(supply, demand + extra), None);
        prop_assert!(busier.final_price + 1e-12 >= base.final_price);
    }

    #[test]
    fn prop_lower_soc_never_lowers_price(
        soc in 0.0f64..1.0,
        drop in 0.0f64..1.0,
    ) {
        let config = PricingConfig::default();
        let charged = config.breakdown(&PricingInput { soc, ..market(1.0, 1.0) }, None);
        let drained = config.breakdown(
            &PricingInput { soc: (soc - drop).max(0.0), ..market(1.0, 1.0) },
            None,
        );
        prop_assert!(drained.final_price + 1e-12 >= charged.final_price);
    }
}
