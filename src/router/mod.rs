//! Router configuration - RESTful v1 API

use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::app_state::AppState;
use crate::handlers::{health, market, metrics, orders, trades};
use crate::middleware::metrics_middleware;

/// Build the application router.
pub fn build_router(app_state: AppState) -> Router {
    let request_timeout = Duration::from_secs(app_state.config.request_timeout);

    let v1_api = Router::new()
        .route("/market/price", get(market::get_price_quote))
        .route("/orders", post(orders::create_order))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/cancel", post(orders::cancel_order))
        .route("/users/{id}/trades", get(trades::get_user_trades))
        .route("/users/{id}/yield", get(trades::get_user_yield));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::get_prometheus_metrics))
        .nest("/api/v1", v1_api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(metrics_middleware))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}
