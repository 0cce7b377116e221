use axum::{extract::Request, middleware::Next, response::Response};
use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Tracks request count, latency and server errors per route.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!("http_requests_in_flight").increment(1.0);
    let response = next.run(request).await;
    gauge!("http_requests_in_flight").decrement(1.0);

    let status = response.status().as_u16().to_string();
    histogram!(
        "http_request_duration_seconds",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.clone()
    )
    .record(start.elapsed().as_secs_f64());

    counter!(
        "http_requests_total",
        "method" => method,
        "path" => path,
        "status" => status
    )
    .increment(1);

    response
}

/// Track one matching cycle
pub fn track_matching_cycle(duration: Duration, matches: usize, success: bool) {
    counter!("matching_cycles_total", "success" => success.to_string()).increment(1);
    histogram!("matching_cycle_duration_seconds").record(duration.as_secs_f64());
    if matches > 0 {
        counter!("orders_matched_total").increment(matches as u64);
    }
}

/// Track a pair that matched on price and quantity but failed to settle
pub fn track_settlement_failure(reason: &str) {
    counter!("settlement_failures_total", "reason" => reason.to_string()).increment(1);
}

pub fn track_pricing_multiplier(multiplier: f64, clamped: bool) {
    gauge!("pricing_multiplier").set(multiplier);
    if clamped {
        counter!("pricing_multiplier_clamped_total").increment(1);
    }
}

pub fn track_community_soc(soc: f64) {
    gauge!("community_soc").set(soc);
}

/// Track the outcome of a side-effect task attempt
pub fn track_side_effect_task(kind: &str, outcome: &str) {
    counter!(
        "side_effect_tasks_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn track_order_created(side: &str) {
    counter!("orders_created_total", "side" => side.to_string()).increment(1);
}
