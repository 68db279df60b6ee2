//! Weekly simulation of the sleeve allocator.
//!
//! This module provides:
//! - A scripted market path cycling through risk-on, neutral and risk-off
//! - A simulated book that fills approved orders and decays option marks
//! - A simulator that drives the cycle planner week by week
//! - Per-week reports with invariant checks
//!
//! # Example
//!
//! ```rust,ignore
//! use sleeve_allocator::backtest::{SimulationConfig, SleeveSimulator};
//!
//! let simulator = SleeveSimulator::new(config, SimulationConfig::default())?;
//! let summary = simulator.run().await?;
//! summary.check_invariants()?;
//! println!("{}", summary.summary());
//! ```

mod book;
mod engine;
mod market;
mod metrics;

pub use book::SimulatedBook;
pub use engine::SleeveSimulator;
pub use market::{MarketPath, MarketWeek, Phase};
pub use metrics::{SimulationSummary, WeekReport};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Starting account value
    pub initial_nav: Decimal,

    /// Number of weekly cycles
    pub weeks: u32,

    /// Timestamp of the first cycle
    pub start: DateTime<Utc>,

    /// Weeks spent in each market phase
    pub weeks_per_phase: u32,

    /// Fraction of option mark lost each week
    pub option_weekly_decay: Decimal,

    /// Start fully invested at the first week's target
    pub seed_core: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_nav: dec!(100000),
            weeks: 16,
            start: Utc::now(),
            weeks_per_phase: 4,
            option_weekly_decay: dec!(0.05),
            seed_core: true,
        }
    }
}
