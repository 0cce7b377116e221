// Business logic services
// Pricing, matching, settlement and the capabilities they drive.

pub mod community_state;
pub mod device_command;
pub mod ledger;
pub mod order_matching_engine;
pub mod order_service;
pub mod pricing;
pub mod reserve_proof;
pub mod settlement;
pub mod task_queue;
pub mod telemetry_simulator;

pub use community_state::CommunityStateEstimator;
pub use device_command::{DeviceCommander, HttpDeviceCommander, LoggingDeviceCommander};
pub use ledger::{LedgerClient, RpcLedgerClient, SimulatedLedger};
pub use order_matching_engine::{CycleReport, MatchingConfig, OrderMatchingEngine};
pub use order_service::OrderService;
pub use pricing::{PricingConfig, PricingEngine, PricingInput};
pub use reserve_proof::{ReserveProof, ReserveProver};
pub use settlement::{SettlementCoordinator, SideEffectExecutor, SideEffectTask};
pub use task_queue::{TaskQueue, TaskQueueConfig};
pub use telemetry_simulator::TelemetrySimulator;
