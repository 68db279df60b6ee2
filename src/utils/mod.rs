//! Shared utilities.

pub mod decimal;

pub use decimal::{clamp, round_down_to_lot, round_to_tick, safe_div};
