//! Allocation strategy.
//!
//! Contains the core logic for:
//! - Arbitrating between the insurance and growth option overlays
//! - Running the option sleeve lifecycle
//! - Drift rebalancing of the core ETF sleeve with proxy substitution

mod arbitrator;
pub mod options;
mod proxy;
mod rebalancer;

pub use arbitrator::{
    arbitrate_sleeves, ArbitrationConfig, SleeveArbitrationResult, SleevePermissions,
};
pub use proxy::ProxyMap;
pub use rebalancer::{
    DriftReport, ProxySubstitution, RebalanceEngine, RebalanceRequest, RebalanceResult,
    RebalanceStatus, RebalanceTrigger, SleeveProtection, TargetPlan,
};
