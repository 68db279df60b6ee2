//! Market regime classification consumed by the allocator.
//!
//! Regimes are produced by an external classifier and are immutable for the
//! duration of a run.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Equity trend regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquityRegimeLabel {
    RiskOn,
    Neutral,
    RiskOff,
}

/// Volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolRegimeLabel {
    Low,
    Normal,
    High,
}

/// Rates trend regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatesRegimeLabel {
    Easing,
    Neutral,
    Tightening,
}

/// Central bank stance attached to the rates regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatesStance {
    Dovish,
    Neutral,
    Hawkish,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityRegime {
    pub label: EquityRegimeLabel,
    /// Classifier confidence (0.0-1.0)
    pub confidence: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolRegime {
    pub label: VolRegimeLabel,
    pub confidence: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatesRegime {
    pub label: RatesRegimeLabel,
    pub stance: RatesStance,
    pub confidence: Decimal,
}

/// Full regime snapshot for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeContext {
    pub equity: EquityRegime,
    pub vol: VolRegime,
    pub rates: RatesRegime,
    /// Share of universe above trend (0.0-1.0)
    #[serde(default)]
    pub breadth: Decimal,
}

impl RegimeContext {
    /// Build a context with neutral rates and zero breadth.
    pub fn new(
        equity: EquityRegimeLabel,
        equity_confidence: Decimal,
        vol: VolRegimeLabel,
    ) -> Self {
        Self {
            equity: EquityRegime {
                label: equity,
                confidence: equity_confidence,
            },
            vol: VolRegime {
                label: vol,
                confidence: equity_confidence,
            },
            rates: RatesRegime {
                label: RatesRegimeLabel::Neutral,
                stance: RatesStance::Neutral,
                confidence: Decimal::ZERO,
            },
            breadth: Decimal::ZERO,
        }
    }

    /// Value of a regime-change key, rendered for comparison and logging.
    pub fn key_value(&self, key: RegimeKey) -> String {
        match key {
            RegimeKey::Equity => format!("{:?}", self.equity.label),
            RegimeKey::Vol => format!("{:?}", self.vol.label),
            RegimeKey::Rates => format!("{:?}", self.rates.label),
            RegimeKey::RatesStance => format!("{:?}", self.rates.stance),
        }
    }
}

/// Regime dimension whose change can force a rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeKey {
    Equity,
    Vol,
    Rates,
    RatesStance,
}

impl fmt::Display for RegimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeKey::Equity => write!(f, "equity"),
            RegimeKey::Vol => write!(f, "vol"),
            RegimeKey::Rates => write!(f, "rates"),
            RegimeKey::RatesStance => write!(f, "rates_stance"),
        }
    }
}
