//! Options overlay sleeves.
//!
//! - `chain`: chain data provider trait and a static snapshot provider
//! - `selection`: underlying preference walk and contract picking
//! - `sleeve`: per-sleeve lifecycle and budget-constrained sizing

mod chain;
mod selection;
mod sleeve;

#[cfg(test)]
pub use chain::MockChainDataProvider;
pub use chain::{ChainDataProvider, OptionCandidate, StaticChain};
pub use selection::{
    months_to_expiry, pick_from_chain, select_options_underlying,
    select_options_underlying_with, synthetic_candidate, OptionsIntent, UnderlyingSelection,
};
pub use sleeve::{
    OptionSleevePlanner, OptionSleeveState, SleeveContext, SleeveKind, SleevePlan, SleeveStatus,
};
