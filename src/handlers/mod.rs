// HTTP handlers for the thin request-serving layer around the market core.

pub mod health;
pub mod market;
pub mod metrics;
pub mod orders;
pub mod trades;
