//! Scripted weekly market path for simulation.
//!
//! Cycles through risk-on, neutral, risk-off (with a two-week dislocation)
//! and neutral phases, moving prices by a fixed weekly return per phase.
//! Deterministic so simulation runs are reproducible.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{EquityRegimeLabel, QuoteMap, RegimeContext, VolRegimeLabel};
use crate::strategy::TargetPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    RiskOn,
    Neutral,
    RiskOff,
}

const SCHEDULE: [Phase; 4] = [Phase::RiskOn, Phase::Neutral, Phase::RiskOff, Phase::Neutral];

/// One simulated week of market inputs.
#[derive(Debug, Clone)]
pub struct MarketWeek {
    pub phase: Phase,
    pub regimes: RegimeContext,
    pub dislocation_active: bool,
    pub prices: QuoteMap,
    pub target: TargetPlan,
}

/// Deterministic weekly price and regime generator.
#[derive(Debug, Clone)]
pub struct MarketPath {
    weeks_per_phase: u32,
    prices: BTreeMap<String, Decimal>,
    week: u32,
}

impl Default for MarketPath {
    fn default() -> Self {
        Self::new(4)
    }
}

impl MarketPath {
    pub fn new(weeks_per_phase: u32) -> Self {
        let prices = [
            ("SPY", dec!(500)),
            ("SPLG", dec!(58)),
            ("QQQ", dec!(420)),
            ("QQQM", dec!(175)),
            ("IWM", dec!(200)),
            ("TLT", dec!(90)),
            ("GLD", dec!(190)),
        ]
        .iter()
        .map(|(s, p)| (s.to_string(), *p))
        .collect();

        Self {
            weeks_per_phase: weeks_per_phase.max(1),
            prices,
            week: 0,
        }
    }

    fn phase_for(&self, week: u32) -> Phase {
        SCHEDULE[((week / self.weeks_per_phase) as usize) % SCHEDULE.len()]
    }

    fn weekly_return(phase: Phase, symbol: &str) -> Decimal {
        match (phase, symbol) {
            (Phase::RiskOn, "SPY" | "SPLG" | "IWM") => dec!(0.010),
            (Phase::RiskOn, "QQQ" | "QQQM") => dec!(0.015),
            (Phase::RiskOn, "TLT") => dec!(-0.005),
            (Phase::RiskOff, "SPY" | "SPLG") => dec!(-0.025),
            (Phase::RiskOff, "QQQ" | "QQQM" | "IWM") => dec!(-0.030),
            (Phase::RiskOff, "TLT") => dec!(0.010),
            (Phase::RiskOff, "GLD") => dec!(0.015),
            _ => Decimal::ZERO,
        }
    }

    fn target(phase: Phase) -> TargetPlan {
        let weights: &[(&str, Decimal)] = match phase {
            Phase::RiskOn => &[
                ("SPY", dec!(0.45)),
                ("QQQ", dec!(0.25)),
                ("TLT", dec!(0.15)),
                ("GLD", dec!(0.15)),
            ],
            Phase::Neutral => &[
                ("SPY", dec!(0.35)),
                ("QQQ", dec!(0.15)),
                ("TLT", dec!(0.25)),
                ("GLD", dec!(0.25)),
            ],
            Phase::RiskOff => &[
                ("SPY", dec!(0.25)),
                ("QQQ", dec!(0.10)),
                ("TLT", dec!(0.35)),
                ("GLD", dec!(0.30)),
            ],
        };
        TargetPlan {
            weights: weights.iter().map(|(s, w)| (s.to_string(), *w)).collect(),
        }
    }

    /// Advance one week and return its inputs.
    pub fn next_week(&mut self) -> MarketWeek {
        let week = self.week;
        let phase = self.phase_for(week);

        // Prices move from the second week on
        if week > 0 {
            for (symbol, price) in self.prices.iter_mut() {
                let r = Self::weekly_return(phase, symbol);
                *price = (*price * (Decimal::ONE + r)).round_dp(2);
            }
        }

        let (equity, confidence, vol) = match phase {
            Phase::RiskOn => (EquityRegimeLabel::RiskOn, dec!(0.8), VolRegimeLabel::Low),
            Phase::Neutral => (EquityRegimeLabel::Neutral, dec!(0.6), VolRegimeLabel::Normal),
            Phase::RiskOff => (EquityRegimeLabel::RiskOff, dec!(0.8), VolRegimeLabel::High),
        };
        let dislocation_active =
            phase == Phase::RiskOff && week % self.weeks_per_phase < 2;

        self.week += 1;

        MarketWeek {
            phase,
            regimes: RegimeContext::new(equity, confidence, vol),
            dislocation_active,
            prices: self.prices.iter().map(|(s, p)| (s.clone(), *p)).collect(),
            target: Self::target(phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_cycle() {
        let mut path = MarketPath::new(2);
        let phases: Vec<Phase> = (0..10).map(|_| path.next_week().phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::RiskOn,
                Phase::RiskOn,
                Phase::Neutral,
                Phase::Neutral,
                Phase::RiskOff,
                Phase::RiskOff,
                Phase::Neutral,
                Phase::Neutral,
                Phase::RiskOn,
                Phase::RiskOn,
            ]
        );
    }

    #[test]
    fn test_prices_follow_phase() {
        let mut path = MarketPath::new(1);
        let first = path.next_week();
        assert_eq!(first.prices["SPY"], dec!(500));
        // Week 1 is neutral: unchanged
        assert_eq!(path.next_week().prices["SPY"], dec!(500));
        let off = path.next_week();
        assert_eq!(off.phase, Phase::RiskOff);
        assert!(off.dislocation_active);
        assert_eq!(off.prices["SPY"], dec!(487.50));
    }

    #[test]
    fn test_targets_fit_deploy_budget() {
        for phase in SCHEDULE {
            let total: Decimal = MarketPath::target(phase).weights.values().sum();
            assert_eq!(total, Decimal::ONE);
        }
    }
}
