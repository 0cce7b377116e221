//! External ledger settlement capability.
//!
//! The core only needs `submit_trade` and `monitor`. `SimulatedLedger` stands
//! in for development; `RpcLedgerClient` speaks JSON-RPC 2.0 to a ledger node
//! and signs each submission with the oracle key.

pub mod oracle;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::env_or;
use oracle::{OracleParams, OracleSigner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Simulated,
    Rpc,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub mode: LedgerMode,
    pub rpc_url: Option<String>,
    pub contract_id: Option<String>,
    pub oracle_seed: Option<String>,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mode: LedgerMode::Simulated,
            rpc_url: None,
            contract_id: None,
            oracle_seed: None,
            poll_interval: Duration::from_millis(1000),
            max_polls: 30,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mode = match std::env::var("LEDGER_MODE")
            .unwrap_or_else(|_| "simulated".to_string())
            .to_lowercase()
            .as_str()
        {
            "simulated" => LedgerMode::Simulated,
            "rpc" => LedgerMode::Rpc,
            other => bail!("Unsupported LEDGER_MODE: {}", other),
        };

        let rpc_url = std::env::var("LEDGER_RPC_URL").ok().filter(|s| !s.is_empty());
        if mode == LedgerMode::Rpc && rpc_url.is_none() {
            bail!("LEDGER_RPC_URL environment variable is required when LEDGER_MODE=rpc");
        }

        Ok(Self {
            mode,
            rpc_url,
            contract_id: std::env::var("LEDGER_CONTRACT_ID").ok().filter(|s| !s.is_empty()),
            oracle_seed: std::env::var("LEDGER_ORACLE_SEED").ok().filter(|s| !s.is_empty()),
            poll_interval: Duration::from_millis(env_or("LEDGER_MONITOR_POLL_MS", 1000)),
            max_polls: env_or("LEDGER_MONITOR_MAX_POLLS", 30u32).max(1),
        })
    }
}

/// Trade data handed to the ledger.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerSubmission {
    pub trade_id: String,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub seller_id: Uuid,
    pub buyer_id: Uuid,
    pub kwh_amount: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    /// Seller's composite delivery-quality score in [0, 1] forwarded to the
    /// oracle, 0 without history
    pub quality: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Confirmed,
    Failed,
    /// Not final within the monitor's polling budget
    Pending,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submits the trade and returns the ledger's transaction reference.
    async fn submit_trade(&self, submission: &LedgerSubmission) -> anyhow::Result<String>;

    async fn monitor(&self, reference: &str) -> anyhow::Result<LedgerStatus>;
}

pub fn build_ledger_client(config: &LedgerConfig) -> anyhow::Result<Arc<dyn LedgerClient>> {
    match config.mode {
        LedgerMode::Simulated => {
            info!("Ledger client: simulated");
            Ok(Arc::new(SimulatedLedger::new(config.poll_interval)))
        }
        LedgerMode::Rpc => {
            let client = RpcLedgerClient::new(config)?;
            info!(
                "Ledger client: JSON-RPC at {} (oracle {})",
                client.rpc_url,
                client.oracle.oracle_id()
            );
            Ok(Arc::new(client))
        }
    }
}

/// Accepts every submission and confirms it after a fixed delay.
pub struct SimulatedLedger {
    confirm_delay: Duration,
}

impl SimulatedLedger {
    pub fn new(confirm_delay: Duration) -> Self {
        Self { confirm_delay }
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit_trade(&self, submission: &LedgerSubmission) -> anyhow::Result<String> {
        let short_id: String = submission.buy_order_id.simple().to_string().chars().take(8).collect();
        let reference = format!("tx_simulated_{}_{}", Utc::now().format("%H%M%S"), short_id);
        debug!("Simulated ledger accepted {} as {}", submission.trade_id, reference);
        Ok(reference)
    }

    async fn monitor(&self, _reference: &str) -> anyhow::Result<LedgerStatus> {
        tokio::time::sleep(self.confirm_delay).await;
        Ok(LedgerStatus::Confirmed)
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

pub struct RpcLedgerClient {
    client: Client,
    rpc_url: String,
    contract_id: Option<String>,
    oracle: OracleSigner,
    poll_interval: Duration,
    max_polls: u32,
}

impl RpcLedgerClient {
    pub fn new(config: &LedgerConfig) -> anyhow::Result<Self> {
        let rpc_url = config
            .rpc_url
            .clone()
            .ok_or_else(|| anyhow!("LEDGER_RPC_URL is not set"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build ledger HTTP client")?;

        Ok(Self {
            client,
            rpc_url,
            contract_id: config.contract_id.clone(),
            oracle: OracleSigner::from_seed_hex(config.oracle_seed.as_deref())?,
            poll_interval: config.poll_interval,
            max_polls: config.max_polls,
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("bad {} response", method))?;

        if let Some(err) = response.error {
            bail!("rpc error {} on {}: {}", err.code, method, err.message);
        }
        response
            .result
            .ok_or_else(|| anyhow!("{} returned no result", method))
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn submit_trade(&self, submission: &LedgerSubmission) -> anyhow::Result<String> {
        let Some(contract_id) = &self.contract_id else {
            bail!("LEDGER_CONTRACT_ID is not set, skipping submission of {}", submission.trade_id);
        };

        let latest = self.rpc("getLatestLedger", Value::Null).await?;
        debug!("Ledger node reachable, latest ledger: {}", latest);

        let payload = self.oracle.sign(OracleParams {
            timestamp: Utc::now().timestamp(),
            price: submission.unit_price.to_f64().unwrap_or_default(),
            quality: submission.quality,
        })?;

        let result = self
            .rpc(
                "sendTransaction",
                json!({
                    "contract_id": contract_id,
                    "function": "execute_trade",
                    "trade_id": submission.trade_id,
                    "order_id": submission.buy_order_id,
                    "seller": submission.seller_id,
                    "buyer": submission.buyer_id,
                    "kwh_amount": submission.kwh_amount.to_string(),
                    "total": submission.total.to_string(),
                    "oracle": payload,
                }),
            )
            .await?;

        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("sendTransaction response has no hash"))?;
        info!("Submitted trade {} to ledger: {}", submission.trade_id, hash);
        Ok(hash.to_string())
    }

    async fn monitor(&self, reference: &str) -> anyhow::Result<LedgerStatus> {
        for poll in 0..self.max_polls {
            if poll > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }

            let result = self.rpc("getTransaction", json!({ "hash": reference })).await?;
            match result.get("status").and_then(Value::as_str) {
                Some("SUCCESS") => return Ok(LedgerStatus::Confirmed),
                Some("FAILED") => return Ok(LedgerStatus::Failed),
                Some(other) => debug!("Ledger transaction {} status {}", reference, other),
                None => warn!("getTransaction for {} returned no status", reference),
            }
        }
        Ok(LedgerStatus::Pending)
    }
}
