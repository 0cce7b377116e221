use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub environment: String,
    pub matching_engine: String,
}

/// Basic health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let matching_engine = if state.matching_engine.is_running().await {
        "running"
    } else {
        "stopped"
    };

    Json(HealthStatus {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.clone(),
        matching_engine: matching_engine.to_string(),
    })
}
