//! Read-only account snapshot supplied by the ledger / broker reconciliation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::OptionRight;

/// Symbol → last price.
pub type QuoteMap = HashMap<String, Decimal>;

/// ETF holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub hold_since: DateTime<Utc>,
}

/// Broker mark for an open option position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionPosition {
    /// Contract symbol (OCC style)
    pub symbol: String,
    pub underlying: String,
    pub right: OptionRight,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub contracts: u32,
    /// Current marked value of the whole position in USD
    pub mark_value_usd: Decimal,
    /// Broker-reported days to expiry, preferred over a calendar difference
    #[serde(default)]
    pub days_to_expiry: Option<i64>,
}

impl OptionPosition {
    /// Mark per share, given the contract multiplier.
    pub fn mark_per_share(&self, multiplier: Decimal) -> Option<Decimal> {
        let units = Decimal::from(self.contracts) * multiplier;
        if units.is_zero() {
            None
        } else {
            Some(self.mark_value_usd / units)
        }
    }
}

/// Portfolio snapshot at run time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: Decimal,
    /// Net asset value (cash + market value of holdings and options)
    pub equity: Decimal,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub option_positions: Vec<OptionPosition>,
}

impl PortfolioState {
    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.symbol == symbol)
    }

    pub fn option_position(&self, symbol: &str) -> Option<&OptionPosition> {
        self.option_positions.iter().find(|p| p.symbol == symbol)
    }

    /// Marked value of open option positions of one right.
    pub fn option_mark_value(&self, right: OptionRight) -> Decimal {
        self.option_positions
            .iter()
            .filter(|p| p.right == right)
            .map(|p| p.mark_value_usd)
            .sum()
    }

    /// Marked value of all open option positions.
    pub fn total_option_mark_value(&self) -> Decimal {
        self.option_positions.iter().map(|p| p.mark_value_usd).sum()
    }
}

/// Shares of a symbol owned by the dislocation overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleevePosition {
    #[serde(default)]
    pub dislocation_qty: Option<Decimal>,
}
