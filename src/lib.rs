//! # Sleeve Allocator
//!
//! Long-only ETF portfolio allocation with two mutually exclusive option
//! overlays: protective puts (insurance) and upside calls (growth).
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `model`: Orders, account snapshot, regimes and diagnostic flags
//! - `capital`: NAV split into core and reserve pools, exposure caps
//! - `strategy`: Sleeve arbitration, option sleeves, drift rebalancing
//! - `risk`: Pre-trade constraint battery and drawdown tracking
//! - `persistence`: Durable per-sleeve state (JSON files, SQLite, memory)
//! - `planner`: One planning cycle wiring everything together
//! - `backtest`: Weekly simulation over a scripted market path
//! - `utils`: Shared utilities and decimal arithmetic

pub mod backtest;
pub mod capital;
pub mod config;
pub mod model;
pub mod persistence;
pub mod planner;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
