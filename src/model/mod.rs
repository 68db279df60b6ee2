//! Shared data model: orders, account snapshot, regimes and diagnostic flags.

mod flags;
mod orders;
mod portfolio;
mod regime;

pub use flags::{has_flag, Flag, FlagDetail, Severity};
pub use orders::{
    occ_symbol, OptionAction, OptionLeg, OptionRight, OrderSide, OrderSize, OrderType,
    SleeveTag, TradeOrder,
};
pub use portfolio::{Holding, OptionPosition, PortfolioState, QuoteMap, SleevePosition};
pub use regime::{
    EquityRegime, EquityRegimeLabel, RatesRegime, RatesRegimeLabel, RatesStance,
    RegimeContext, RegimeKey, VolRegime, VolRegimeLabel,
};
