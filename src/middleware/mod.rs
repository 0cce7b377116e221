// Middleware module - request metrics and the domain metric helpers

pub mod metrics;

pub use metrics::metrics_middleware;
