use std::sync::Arc;

use tracing::warn;

use crate::database::repository::DeviceRepository;
use crate::middleware::metrics::track_community_soc;

/// Reported when no device has a battery reading or telemetry is unreachable.
pub const NEUTRAL_SOC: f64 = 0.5;

/// Aggregates device telemetry into the community-wide scarcity signal.
#[derive(Clone)]
pub struct CommunityStateEstimator {
    devices: Arc<dyn DeviceRepository>,
}

impl CommunityStateEstimator {
    pub fn new(devices: Arc<dyn DeviceRepository>) -> Self {
        Self { devices }
    }

    /// Mean battery level across devices that report one, in [0, 1].
    /// Fails open to [`NEUTRAL_SOC`].
    pub async fn estimate_soc(&self) -> f64 {
        let devices = match self.devices.list_all().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device telemetry unavailable, using neutral SoC: {}", e);
                return NEUTRAL_SOC;
            }
        };

        let levels: Vec<f64> = devices
            .iter()
            .filter_map(|d| d.battery_level)
            .filter(|l| l.is_finite())
            .map(|l| l.clamp(0.0, 1.0))
            .collect();

        let soc = if levels.is_empty() {
            NEUTRAL_SOC
        } else {
            levels.iter().sum::<f64>() / levels.len() as f64
        };

        track_community_soc(soc);
        soc
    }
}
