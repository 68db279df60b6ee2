//! Order types handed to the execution collaborator.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Put or call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionRight {
    Put,
    Call,
}

impl OptionRight {
    /// OCC symbol code.
    pub fn code(&self) -> char {
        match self {
            OptionRight::Put => 'P',
            OptionRight::Call => 'C',
        }
    }
}

/// Option open/close intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionAction {
    BuyToOpen,
    SellToClose,
}

/// Which sleeve produced an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleeveTag {
    Base,
    Insurance,
    Growth,
}

impl fmt::Display for SleeveTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleeveTag::Base => write!(f, "base"),
            SleeveTag::Insurance => write!(f, "insurance"),
            SleeveTag::Growth => write!(f, "growth"),
        }
    }
}

/// Order size: a unit quantity (shares or contracts) or a USD notional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OrderSize {
    Quantity(Decimal),
    Notional(Decimal),
}

/// Option contract details attached to an option order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub underlying: String,
    pub right: OptionRight,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    /// Shares per contract (100 for US equity options)
    pub multiplier: Decimal,
    pub action: OptionAction,
}

/// A single order ready for the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: OrderSize,
    /// Price used for notional estimates (per share; option premium per share)
    pub reference_price: Decimal,
    pub thesis: String,
    pub invalidation: String,
    pub confidence: Decimal,
    /// True for orders that act on the whole portfolio rather than one idea
    pub portfolio_level: bool,
    pub sleeve: SleeveTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<OptionLeg>,
}

impl TradeOrder {
    /// Market ETF order sized in shares.
    pub fn shares(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            size: OrderSize::Quantity(quantity),
            reference_price,
            thesis: String::new(),
            invalidation: String::new(),
            confidence: Decimal::ZERO,
            portfolio_level: true,
            sleeve: SleeveTag::Base,
            option: None,
        }
    }

    /// Market ETF order sized in USD.
    pub fn notional(
        symbol: impl Into<String>,
        side: OrderSide,
        notional_usd: Decimal,
        reference_price: Decimal,
    ) -> Self {
        Self {
            size: OrderSize::Notional(notional_usd),
            ..Self::shares(symbol, side, Decimal::ZERO, reference_price)
        }
    }

    /// Limit option order sized in whole contracts.
    pub fn option(
        symbol: impl Into<String>,
        side: OrderSide,
        contracts: u32,
        premium_per_share: Decimal,
        leg: OptionLeg,
        sleeve: SleeveTag,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            size: OrderSize::Quantity(Decimal::from(contracts)),
            reference_price: premium_per_share,
            thesis: String::new(),
            invalidation: String::new(),
            confidence: Decimal::ZERO,
            portfolio_level: false,
            sleeve,
            option: Some(leg),
        }
    }

    pub fn with_thesis(mut self, thesis: impl Into<String>, invalidation: impl Into<String>) -> Self {
        self.thesis = thesis.into();
        self.invalidation = invalidation.into();
        self
    }

    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn is_buy(&self) -> bool {
        self.side == OrderSide::Buy
    }

    pub fn is_option(&self) -> bool {
        self.option.is_some()
    }

    fn multiplier(&self) -> Decimal {
        self.option
            .as_ref()
            .map(|leg| leg.multiplier)
            .unwrap_or(Decimal::ONE)
    }

    /// Estimated USD value of the order.
    pub fn notional_usd(&self) -> Decimal {
        match self.size {
            OrderSize::Notional(usd) => usd,
            OrderSize::Quantity(qty) => qty * self.reference_price * self.multiplier(),
        }
    }

    /// Unit quantity, deriving it from notional when needed.
    pub fn quantity(&self) -> Decimal {
        match self.size {
            OrderSize::Quantity(qty) => qty,
            OrderSize::Notional(usd) => {
                let unit = self.reference_price * self.multiplier();
                if unit.is_zero() {
                    Decimal::ZERO
                } else {
                    usd / unit
                }
            }
        }
    }

    /// Symbol used for universe checks (the underlying for options).
    pub fn universe_symbol(&self) -> &str {
        self.option
            .as_ref()
            .map(|leg| leg.underlying.as_str())
            .unwrap_or(&self.symbol)
    }
}

/// Build an OCC-style option symbol, e.g. `QQQ261218P00450000`.
pub fn occ_symbol(underlying: &str, expiry: NaiveDate, right: OptionRight, strike: Decimal) -> String {
    let strike_milli = (strike * Decimal::from(1000)).trunc().normalize();
    format!(
        "{}{}{}{:0>8}",
        underlying,
        expiry.format("%y%m%d"),
        right.code(),
        strike_milli.to_string()
    )
}
