//! Demo telemetry feed.
//!
//! Stands in for real device reporting in development: seeds a small community
//! and drifts each lock-capable device's battery level every interval. The
//! matching core only ever reads what this writes.

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::env_or;
use crate::database::repository::DeviceRepository;
use crate::error::Result;
use crate::models::DeviceTelemetry;

const MIN_LEVEL: f64 = 0.1;
const MAX_LEVEL: f64 = 1.0;
/// Per-tick change is drawn from `[-0.04, 0.06)`, biased towards charging
const DRIFT_LOW: f64 = -0.04;
const DRIFT_HIGH: f64 = 0.06;

pub const DEMO_DONOR_A: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_000a);
pub const DEMO_DONOR_C: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_000c);
pub const DEMO_OPERATOR: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_00ad);

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub seed_devices: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(10),
            seed_devices: true,
        }
    }
}

impl SimulationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("SIMULATION_ENABLED", defaults.enabled),
            interval: Duration::from_secs(env_or("SIMULATION_INTERVAL_SECS", 10u64).max(1)),
            seed_devices: env_or("SIMULATION_SEED_DEVICES", defaults.seed_devices),
        }
    }
}

#[derive(Clone)]
pub struct TelemetrySimulator {
    devices: Arc<dyn DeviceRepository>,
    config: SimulationConfig,
    lock_device_type: String,
}

impl TelemetrySimulator {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        config: SimulationConfig,
        lock_device_type: impl Into<String>,
    ) -> Self {
        Self {
            devices,
            config,
            lock_device_type: lock_device_type.into(),
        }
    }

    /// Two donor batteries and one relay node without a battery.
    pub async fn seed_demo_devices(&self) -> Result<()> {
        let demo = [
            ("esp32_a", DEMO_DONOR_A, self.lock_device_type.as_str(), Some(0.85)),
            ("esp32_c", DEMO_DONOR_C, self.lock_device_type.as_str(), Some(0.45)),
            ("raspi_node_1", DEMO_OPERATOR, "raspi", None),
        ];

        for (id, owner_id, device_type, battery_level) in demo {
            self.devices
                .upsert(&DeviceTelemetry {
                    id: id.to_string(),
                    owner_id,
                    device_type: device_type.to_string(),
                    battery_level,
                    status: "online".to_string(),
                    last_ping: Some(chrono::Utc::now()),
                })
                .await?;
        }
        info!("🌱 Seeded {} demo devices", demo.len());
        Ok(())
    }

    /// Applies one random drift to every lock-capable device. Returns how many
    /// devices were updated.
    pub async fn fluctuate_once<R: Rng + Send>(&self, rng: &mut R) -> Result<usize> {
        let devices = self.devices.list_all().await?;
        let mut updated = 0;

        for device in devices
            .iter()
            .filter(|d| d.device_type == self.lock_device_type)
        {
            let Some(level) = device.battery_level else {
                continue;
            };
            let next = drift(level, rng.gen_range(DRIFT_LOW..DRIFT_HIGH));
            if let Err(e) = self.devices.set_battery_level(&device.id, next).await {
                warn!("Failed to update battery level for {}: {}", device.id, e);
                continue;
            }
            updated += 1;
        }

        debug!("[Simulation] Battery levels updated on {} device(s)", updated);
        Ok(updated)
    }

    pub async fn start(&self) {
        if self.config.seed_devices {
            if let Err(e) = self.seed_demo_devices().await {
                warn!("Failed to seed demo devices: {}", e);
            }
        }

        info!(
            "🔋 Starting telemetry simulation (interval: {:?})",
            self.config.interval
        );

        let simulator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(simulator.config.interval);
            loop {
                ticker.tick().await;
                let mut rng = rand::rngs::StdRng::from_entropy();
                if let Err(e) = simulator.fluctuate_once(&mut rng).await {
                    warn!("Telemetry simulation tick failed: {}", e);
                }
            }
        });
    }
}

fn drift(level: f64, change: f64) -> f64 {
    (level + change).clamp(MIN_LEVEL, MAX_LEVEL)
}
