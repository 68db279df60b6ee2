//! Per-week records and run summary for the sleeve simulation.

use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::market::Phase;
use crate::planner::ReserveLedger;
use crate::strategy::options::SleeveStatus;

/// Ledger identities must hold to this tolerance.
const LEDGER_TOLERANCE: Decimal = dec!(0.0001);

/// One simulated week.
#[derive(Debug, Clone, Serialize)]
pub struct WeekReport {
    pub week: u32,
    pub as_of: DateTime<Utc>,
    pub phase: Phase,
    /// NAV before trading
    pub nav: Decimal,
    pub drawdown: Decimal,
    pub approved: bool,
    pub orders: usize,
    /// Persisted sleeve statuses after the cycle
    pub insurance: SleeveStatus,
    pub growth: SleeveStatus,
    pub reserve: ReserveLedger,
    pub flags: Vec<String>,
}

/// Outcome of a whole simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub initial_nav: Decimal,
    pub final_nav: Decimal,
    pub total_return_pct: Decimal,
    pub max_drawdown: Decimal,
    pub premium_spent: Decimal,
    pub weeks: Vec<WeekReport>,
}

impl SimulationSummary {
    pub fn rejected_cycles(&self) -> usize {
        self.weeks.iter().filter(|w| !w.approved).count()
    }

    pub fn deployed_weeks(&self, insurance: bool) -> usize {
        self.weeks
            .iter()
            .filter(|w| {
                let status = if insurance { w.insurance } else { w.growth };
                status == SleeveStatus::Deployed
            })
            .count()
    }

    /// Verify the sleeve and reserve invariants for every week.
    pub fn check_invariants(&self) -> Result<()> {
        for w in &self.weeks {
            ensure!(
                !(w.insurance == SleeveStatus::Deployed && w.growth == SleeveStatus::Deployed),
                "week {}: both overlays deployed",
                w.week
            );

            let r = &w.reserve;
            ensure!(
                (r.used_insurance + r.used_growth - r.used_total).abs() <= LEDGER_TOLERANCE,
                "week {}: used_total {} != {} + {}",
                w.week,
                r.used_total,
                r.used_insurance,
                r.used_growth
            );
            ensure!(
                (r.reserve_budget - r.used_total - r.remaining).abs() <= LEDGER_TOLERANCE,
                "week {}: remaining {} != {} - {}",
                w.week,
                r.remaining,
                r.reserve_budget,
                r.used_total
            );
            ensure!(
                r.remaining >= Decimal::ZERO,
                "week {}: reserve overspent, remaining {}",
                w.week,
                r.remaining
            );
        }
        Ok(())
    }

    /// Human-readable report.
    pub fn summary(&self) -> String {
        let orders: usize = self.weeks.iter().map(|w| w.orders).sum();
        format!(
            r#"═══════════════════════════════════════════════
SLEEVE SIMULATION ({} weeks)
═══════════════════════════════════════════════
RETURNS
  Initial NAV:       ${:.2}
  Final NAV:         ${:.2}
  Total Return:      {:.2}%

RISK
  Max Drawdown:      {:.2}%
  Rejected Cycles:   {}

OVERLAYS
  Premium Spent:     ${:.2}
  Insurance Weeks:   {}
  Growth Weeks:      {}

ACTIVITY
  Total Orders:      {}
═══════════════════════════════════════════════"#,
            self.weeks.len(),
            self.initial_nav,
            self.final_nav,
            self.total_return_pct,
            self.max_drawdown * dec!(100),
            self.rejected_cycles(),
            self.premium_spent,
            self.deployed_weeks(true),
            self.deployed_weeks(false),
            orders,
        )
    }
}
