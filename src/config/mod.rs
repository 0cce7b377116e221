use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::services::device_command::DeviceConfig;
use crate::services::ledger::LedgerConfig;
use crate::services::order_matching_engine::MatchingConfig;
use crate::services::pricing::PricingConfig;
use crate::services::reserve_proof::ReserveProofConfig;
use crate::services::settlement::SettlementConfig;
use crate::services::task_queue::TaskQueueConfig;
use crate::services::telemetry_simulator::SimulationConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub port: u16,
    pub request_timeout: u64,
    pub log_format: LogFormat,
    pub storage: StorageConfig,
    pub pricing: PricingConfig,
    pub matching: MatchingConfig,
    pub settlement: SettlementConfig,
    pub task_queue: TaskQueueConfig,
    pub ledger: LedgerConfig,
    pub device: DeviceConfig,
    pub reserve_proof: ReserveProofConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 20,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!("Unsupported STORAGE_BACKEND: {}", other),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if backend == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL environment variable is required for postgres storage");
        }

        Ok(Self {
            backend,
            database_url,
            max_connections: env_or("DB_MAX_CONNECTIONS", 20),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            port: 8080,
            request_timeout: 30,
            log_format: LogFormat::Pretty,
            storage: StorageConfig::default(),
            pricing: PricingConfig::default(),
            matching: MatchingConfig::default(),
            settlement: SettlementConfig::default(),
            task_queue: TaskQueueConfig::default(),
            ledger: LedgerConfig::default(),
            device: DeviceConfig::default(),
            reserve_proof: ReserveProofConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("PORT must be a valid port number: {}", e))?,
            request_timeout: env_or("REQUEST_TIMEOUT_SECS", 30),
            log_format,
            storage: StorageConfig::from_env()?,
            pricing: PricingConfig::from_env()?,
            matching: MatchingConfig::from_env(),
            settlement: SettlementConfig::from_env(),
            task_queue: TaskQueueConfig::from_env(),
            ledger: LedgerConfig::from_env()?,
            device: DeviceConfig::from_env(),
            reserve_proof: ReserveProofConfig::from_env()?,
            simulation: SimulationConfig::from_env(),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Read and parse an environment variable, falling back to `default` when it
/// is unset or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
