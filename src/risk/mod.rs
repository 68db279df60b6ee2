//! Risk management for the allocator.
//!
//! - Account-level constraint battery evaluated before order transmission
//! - Trailing weekly drawdown tracking

mod engine;
mod mdd;

pub use engine::{evaluate_risk, RiskReport, RiskState, RiskViolation, TradeIntent};
pub use mdd::{DrawdownTracker, EquitySnapshot};
