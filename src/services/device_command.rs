use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub gateway_url: Option<String>,
    pub gateway_secret: Option<String>,
    /// Device type that accepts delivery-lock commands
    pub lock_device_type: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            gateway_secret: None,
            lock_device_type: "esp32".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn from_env() -> Self {
        Self {
            gateway_url: std::env::var("DEVICE_GATEWAY_URL").ok().filter(|s| !s.is_empty()),
            gateway_secret: std::env::var("DEVICE_GATEWAY_SECRET").ok().filter(|s| !s.is_empty()),
            lock_device_type: std::env::var("DEVICE_LOCK_TYPE").unwrap_or_else(|_| "esp32".to_string()),
        }
    }
}

/// Delivery-lock command for a donor device
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LockCommand {
    pub topic: String,
    pub order_id: Uuid,
    pub kwh_amount: Decimal,
    pub issued_at: String,
}

impl LockCommand {
    pub fn new(device_id: &str, order_id: Uuid, kwh_amount: Decimal) -> Self {
        Self {
            topic: format!("energy/donor/{}/lock", device_id),
            order_id,
            kwh_amount,
            issued_at: Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait DeviceCommander: Send + Sync {
    async fn send_lock(&self, device_id: &str, order_id: Uuid, kwh_amount: Decimal) -> Result<()>;
}

pub fn build_device_commander(config: &DeviceConfig) -> Result<Arc<dyn DeviceCommander>> {
    match &config.gateway_url {
        Some(url) => {
            info!("Device commands go to gateway {}", url);
            Ok(Arc::new(HttpDeviceCommander::new(url.clone(), config.gateway_secret.clone())?))
        }
        None => {
            info!("No DEVICE_GATEWAY_URL set, device commands are logged only");
            Ok(Arc::new(LoggingDeviceCommander))
        }
    }
}

/// Posts lock commands to the device gateway.
pub struct HttpDeviceCommander {
    client: Client,
    gateway_url: String,
    secret: Option<String>,
}

impl HttpDeviceCommander {
    pub fn new(gateway_url: String, secret: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build device gateway client")?;
        Ok(Self {
            client,
            gateway_url,
            secret,
        })
    }
}

/// Hex HMAC-SHA256 of the request body.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid HMAC secret: {}", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl DeviceCommander for HttpDeviceCommander {
    async fn send_lock(&self, device_id: &str, order_id: Uuid, kwh_amount: Decimal) -> Result<()> {
        let command = LockCommand::new(device_id, order_id, kwh_amount);
        let body = serde_json::to_vec(&command)?;

        let mut request = self
            .client
            .post(&self.gateway_url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            request = request.header("X-Signature", sign_body(secret, &body)?);
        }

        let response = request.body(body).send().await.context("device gateway unreachable")?;
        if !response.status().is_success() {
            anyhow::bail!(
                "device gateway rejected lock for {}: {}",
                device_id,
                response.status()
            );
        }

        info!("🔒 Lock sent to {} for order {} ({} kWh)", command.topic, order_id, kwh_amount);
        Ok(())
    }
}

pub struct LoggingDeviceCommander;

#[async_trait]
impl DeviceCommander for LoggingDeviceCommander {
    async fn send_lock(&self, device_id: &str, order_id: Uuid, kwh_amount: Decimal) -> Result<()> {
        info!(
            "🔒 [no gateway] lock energy/donor/{}/lock order={} kwh={}",
            device_id, order_id, kwh_amount
        );
        Ok(())
    }
}
