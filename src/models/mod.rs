// Data models and DTOs

pub mod device;
pub mod incentive;
pub mod pricing;
pub mod trading;

pub use device::{DeviceQualityMetrics, DeviceTelemetry};
pub use incentive::YieldRecord;
pub use pricing::{PriceQuote, PricingBreakdown};
pub use trading::{EnergyOrder, TradeRecord};
