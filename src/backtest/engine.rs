//! Weekly sleeve simulation.
//!
//! Feeds a scripted market path through the cycle planner, fills approved
//! orders in a simulated book and records the outcome of every week.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::book::SimulatedBook;
use super::market::{MarketPath, MarketWeek};
use super::metrics::{SimulationSummary, WeekReport};
use super::SimulationConfig;
use crate::capital::compute_budgets;
use crate::config::Config;
use crate::model::{OrderSide, RegimeContext, TradeOrder};
use crate::persistence::MemorySleeveStore;
use crate::planner::{CycleInput, CyclePlanner, DislocationInput};
use crate::risk::DrawdownTracker;
use crate::strategy::options::SleeveKind;

/// Runs the planner week by week against an in-memory sleeve store.
pub struct SleeveSimulator {
    planner: CyclePlanner,
    sim: SimulationConfig,
}

impl SleeveSimulator {
    pub fn new(config: Config, sim: SimulationConfig) -> Result<Self> {
        let planner = CyclePlanner::new(config, Arc::new(MemorySleeveStore::new()))?;
        Ok(Self { planner, sim })
    }

    /// Run every configured week.
    pub async fn run(&self) -> Result<SimulationSummary> {
        let config = self.planner.config();
        let mut book = SimulatedBook::new(
            self.sim.initial_nav,
            config.options.contract_multiplier,
            self.sim.option_weekly_decay,
        );
        let mut path = MarketPath::new(self.sim.weeks_per_phase);
        let mut drawdown = DrawdownTracker::new(config.risk.max_weekly_drawdown_pct);
        let mut prior_regimes: Option<RegimeContext> = None;
        let mut weeks = Vec::with_capacity(self.sim.weeks as usize);

        info!(
            weeks = self.sim.weeks,
            initial_nav = %self.sim.initial_nav,
            start = %self.sim.start.format("%Y-%m-%d"),
            "Starting sleeve simulation"
        );

        let mut last_prices = None;
        for week in 0..self.sim.weeks {
            let market = path.next_week();
            let as_of = self.sim.start + Duration::weeks(i64::from(week));

            if week == 0 && self.sim.seed_core {
                self.seed_core(&mut book, &market, as_of - Duration::days(7));
            }
            book.advance(as_of);

            let portfolio = book.snapshot(&market.prices);
            drawdown.update(as_of, portfolio.equity);

            let input = CycleInput {
                run_id: format!("sim-{:03}", week),
                as_of,
                portfolio,
                prices: market.prices.clone(),
                regimes: market.regimes.clone(),
                prior_regimes: prior_regimes.replace(market.regimes.clone()),
                target_plan: market.target.clone(),
                confidence_scale: Decimal::ONE,
                dislocation: DislocationInput {
                    active: market.dislocation_active,
                    ..Default::default()
                },
                risk_state: drawdown.risk_state(),
            };

            let plan = self
                .planner
                .run(&input)
                .await
                .with_context(|| format!("Simulation week {} failed", week))?;

            if plan.risk.approved {
                for order in &plan.orders {
                    book.fill(order, as_of);
                }
            }

            let states = self.planner.sleeve_states()?;
            let status = |kind: SleeveKind| {
                states
                    .iter()
                    .find(|(k, _)| *k == kind)
                    .map(|(_, s)| s.status)
                    .unwrap_or_default()
            };

            debug!(
                week,
                phase = ?market.phase,
                nav = %input.portfolio.equity,
                approved = plan.risk.approved,
                orders = plan.orders.len(),
                "Simulated week"
            );

            weeks.push(WeekReport {
                week,
                as_of,
                phase: market.phase,
                nav: input.portfolio.equity,
                drawdown: drawdown.current_drawdown(),
                approved: plan.risk.approved,
                orders: plan.orders.len(),
                insurance: status(SleeveKind::Insurance),
                growth: status(SleeveKind::Growth),
                reserve: plan.reserve,
                flags: plan.flags.iter().map(|f| f.code().to_string()).collect(),
            });
            last_prices = Some(market.prices);
        }

        let final_nav = last_prices
            .map(|prices| book.snapshot(&prices).equity)
            .unwrap_or(self.sim.initial_nav);
        let total_return_pct = if self.sim.initial_nav > Decimal::ZERO {
            (final_nav - self.sim.initial_nav) / self.sim.initial_nav * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let summary = SimulationSummary {
            initial_nav: self.sim.initial_nav,
            final_nav,
            total_return_pct,
            max_drawdown: drawdown.session_mdd(),
            premium_spent: book.premium_spent(),
            weeks,
        };

        info!(
            final_nav = %summary.final_nav,
            rejected = summary.rejected_cycles(),
            "Sleeve simulation complete"
        );
        Ok(summary)
    }

    /// Start from an account already invested at the first week's target.
    fn seed_core(&self, book: &mut SimulatedBook, market: &MarketWeek, at: DateTime<Utc>) {
        let config = self.planner.config();
        let budgets = compute_budgets(
            self.sim.initial_nav,
            market.regimes.equity.confidence,
            Decimal::ONE,
            &config.capital,
        );

        for (symbol, weight) in &market.target.weights {
            let Some(&price) = market.prices.get(symbol) else {
                continue;
            };
            let shares = (budgets.deploy_budget_usd * weight / price).floor();
            if shares > Decimal::ZERO {
                book.fill(&TradeOrder::shares(symbol, OrderSide::Buy, shares, price), at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::Phase;
    use crate::strategy::options::SleeveStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sim_config(weeks: u32) -> SimulationConfig {
        SimulationConfig {
            weeks,
            start: Utc.with_ymd_and_hms(2026, 1, 5, 15, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    fn relaxed() -> Config {
        let mut config = Config::default();
        config.risk.max_notional_traded_pct_per_run = dec!(1.0);
        config.risk.max_position_pct = dec!(0.5);
        config
    }

    #[tokio::test]
    async fn test_full_cycle_keeps_invariants() {
        let simulator = SleeveSimulator::new(relaxed(), sim_config(16)).unwrap();
        let summary = simulator.run().await.unwrap();

        assert_eq!(summary.weeks.len(), 16);
        summary.check_invariants().unwrap();
        assert!(summary.deployed_weeks(false) > 0, "growth never deployed");
        assert!(summary.deployed_weeks(true) > 0, "insurance never deployed");
        assert!(summary.premium_spent > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_growth_opens_in_first_risk_on_week() {
        let simulator = SleeveSimulator::new(relaxed(), sim_config(1)).unwrap();
        let summary = simulator.run().await.unwrap();

        let first = &summary.weeks[0];
        assert!(first.approved);
        assert_eq!(first.growth, SleeveStatus::Deployed);
        assert_eq!(first.insurance, SleeveStatus::Inactive);
        assert!(first.reserve.used_growth > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_insurance_opens_on_risk_off() {
        let sim = SimulationConfig {
            weeks_per_phase: 1,
            ..sim_config(3)
        };
        let summary = SleeveSimulator::new(relaxed(), sim).unwrap().run().await.unwrap();

        let off = &summary.weeks[2];
        assert_eq!(off.phase, Phase::RiskOff);
        assert_eq!(off.insurance, SleeveStatus::Deployed);
        assert_ne!(off.growth, SleeveStatus::Deployed);
    }

    #[tokio::test]
    async fn test_zero_weeks() {
        let summary = SleeveSimulator::new(relaxed(), sim_config(0))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert!(summary.weeks.is_empty());
        assert_eq!(summary.final_nav, summary.initial_nav);
    }
}
