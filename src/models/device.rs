use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Live telemetry for one registered device. Written by the telemetry feed,
/// read-only for the matching core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct DeviceTelemetry {
    pub id: String,
    pub owner_id: Uuid,
    /// "esp32" devices can be lock-commanded; "raspi" nodes are mesh relays.
    pub device_type: String,
    /// State of charge in [0, 1]; `None` for devices without a battery.
    pub battery_level: Option<f64>,
    pub status: String,
    pub last_ping: Option<DateTime<Utc>>,
}

/// Historical delivery performance for a donor device.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct DeviceQualityMetrics {
    pub owner_id: Uuid,
    pub device_id: String,
    pub successful_deliveries: i32,
    pub total_deliveries: i32,
    /// Score 0-100
    pub voltage_stability: f64,
    /// Score 0-100
    pub battery_health_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl DeviceQualityMetrics {
    /// Weighted composite reliability score in [0, 1].
    ///
    /// Delivery ratio uses `total + 1` in the denominator so a device with no
    /// history does not score a perfect ratio.
    pub fn q_score(&self) -> f64 {
        let delivered = self.successful_deliveries.max(0) as f64;
        let total = self.total_deliveries.max(0) as f64;
        let delivery_ratio = (delivered / (total + 1.0)).clamp(0.0, 1.0);
        let voltage = (self.voltage_stability / 100.0).clamp(0.0, 1.0);
        let health = (self.battery_health_score / 100.0).clamp(0.0, 1.0);

        delivery_ratio * 0.4 + voltage * 0.3 + health * 0.3
    }
}
