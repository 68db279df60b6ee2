//! Configuration management for the sleeve allocator.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::model::RegimeKey;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment environment (e.g. "paper", "live"); part of the state key
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Account identifier; part of the state key
    #[serde(default = "default_account_key")]
    pub account_key: String,
    /// Where sleeve state is persisted
    #[serde(default)]
    pub state_store: StateStoreConfig,
    /// Core/reserve partition and exposure caps
    #[serde(default)]
    pub capital: CapitalConfig,
    /// Account-level risk rails
    #[serde(default)]
    pub risk: RiskConfig,
    /// Drift rebalance parameters
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    /// Options overlay parameters
    #[serde(default)]
    pub options: OptionsConfig,
    /// Tradable universe and proxy map
    #[serde(default)]
    pub universe: UniverseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// One JSON blob per sleeve under `dir`
    Json { dir: String },
    /// SQLite database at `path`
    Sqlite { path: String },
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        StateStoreConfig::Sqlite {
            path: "data/sleeve_state.db".to_string(),
        }
    }
}

/// One step of the confidence → exposure cap table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureCapStep {
    /// Minimum equity-regime confidence for this step to apply
    pub min_confidence: Decimal,
    /// Fraction of the core pool deployable at this step (0.0-1.0)
    pub cap_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Share of NAV for the core ETF pool
    #[serde(default = "default_core_pct")]
    pub core_pct: Decimal,
    /// Share of NAV for the options reserve pool
    #[serde(default = "default_reserve_pct")]
    pub reserve_pct: Decimal,
    /// Ordered (ascending confidence) exposure cap steps
    #[serde(default = "default_exposure_caps")]
    pub exposure_caps: Vec<ExposureCapStep>,
    /// Cap used when confidence is below every step
    #[serde(default = "default_floor_cap_pct")]
    pub floor_cap_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum orders per run
    #[serde(default = "default_max_trades_per_run")]
    pub max_trades_per_run: usize,
    /// Weekly drawdown above which BUY orders are blocked (0.0-1.0)
    #[serde(default = "default_max_weekly_drawdown_pct")]
    pub max_weekly_drawdown_pct: Decimal,
    /// Traded notional / equity cap per run (0.0-1.0)
    #[serde(default = "default_max_notional_traded_pct_per_run")]
    pub max_notional_traded_pct_per_run: Decimal,
    /// Minimum hours an ETF holding must be held before it can be sold
    #[serde(default = "default_min_hold_hours")]
    pub min_hold_hours: u32,
    /// Maximum single position value / equity after execution (0.0-1.0)
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: Decimal,
    /// Minimum cash / equity after execution (0.0-1.0)
    #[serde(default = "default_min_cash_buffer_pct")]
    pub min_cash_buffer_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Half-L1 weight drift that triggers a rebalance
    #[serde(default = "default_portfolio_drift_threshold")]
    pub portfolio_drift_threshold: Decimal,
    /// Single position weight drift that triggers a rebalance
    #[serde(default = "default_position_drift_threshold")]
    pub position_drift_threshold: Decimal,
    /// Force a rebalance when any of `regime_change_keys` changes
    #[serde(default = "default_true")]
    pub always_rebalance_on_regime_change: bool,
    #[serde(default = "default_regime_change_keys")]
    pub regime_change_keys: Vec<RegimeKey>,
    /// Fully exit holdings no longer in the target plan
    #[serde(default = "default_true")]
    pub full_exit_removed_symbols: bool,
    /// Orders below this USD value are dropped as dust
    #[serde(default = "default_min_trade_notional_usd")]
    pub min_trade_notional_usd: Decimal,
    /// Residual share counts below this are rounded to zero
    #[serde(default = "default_rebalance_dust_shares_threshold")]
    pub rebalance_dust_shares_threshold: Decimal,
    /// Allow fractional ETF shares
    #[serde(default)]
    pub allow_fractional_shares: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Master switch for both overlays
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Shares per contract
    #[serde(default = "default_contract_multiplier")]
    pub contract_multiplier: Decimal,
    /// General underlying preference list
    #[serde(default = "default_underlyings")]
    pub underlyings: Vec<String>,
    /// Preferred underlyings for the insurance (hedge) sleeve
    #[serde(default)]
    pub hedge_preferred: Vec<String>,
    /// Preferred underlyings for the growth sleeve
    #[serde(default)]
    pub growth_preferred: Vec<String>,
    /// Optional equity-confidence floor for the growth sleeve
    #[serde(default)]
    pub growth_min_confidence: Option<Decimal>,
    #[serde(default = "default_insurance_sleeve")]
    pub insurance: SleeveConfig,
    #[serde(default = "default_growth_sleeve")]
    pub growth: SleeveConfig,
}

/// Per-sleeve option parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleeveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Share of the reserve pool this sleeve may spend (0.0-1.0)
    pub spend_pct: Decimal,
    pub min_months_to_expiry: u32,
    pub max_months_to_expiry: u32,
    pub target_months_to_expiry: u32,
    /// Strike / underlying price bounds
    pub min_moneyness: Decimal,
    pub max_moneyness: Decimal,
    pub target_moneyness: Decimal,
    /// Markup applied to synthetic premium estimates
    pub premium_buffer: Decimal,
    /// Close (or let expire) within this many days of expiry
    pub close_within_days: i64,
    /// Let near-expiry contracts expire instead of closing them
    #[serde(default)]
    pub allow_expire: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Tradable symbols (ETFs and option underlyings)
    #[serde(default = "default_universe_symbols")]
    pub symbols: Vec<String>,
    /// Proxy symbol → parent symbol (e.g. SPLG → SPY)
    #[serde(default)]
    pub proxy_parents: BTreeMap<String, String>,
}

// Default value functions
fn default_environment() -> String {
    "paper".to_string()
}

fn default_account_key() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_core_pct() -> Decimal {
    Decimal::new(70, 2) // 0.70
}

fn default_reserve_pct() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

fn default_exposure_caps() -> Vec<ExposureCapStep> {
    vec![
        ExposureCapStep {
            min_confidence: Decimal::new(40, 2),
            cap_pct: Decimal::new(60, 2),
        },
        ExposureCapStep {
            min_confidence: Decimal::new(60, 2),
            cap_pct: Decimal::new(80, 2),
        },
        ExposureCapStep {
            min_confidence: Decimal::new(75, 2),
            cap_pct: Decimal::ONE,
        },
    ]
}

fn default_floor_cap_pct() -> Decimal {
    Decimal::new(35, 2) // 0.35 when confidence is low
}

fn default_max_trades_per_run() -> usize {
    12
}

fn default_max_weekly_drawdown_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_max_notional_traded_pct_per_run() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

fn default_min_hold_hours() -> u32 {
    24
}

fn default_max_position_pct() -> Decimal {
    Decimal::new(40, 2) // 0.40
}

fn default_min_cash_buffer_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_portfolio_drift_threshold() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_position_drift_threshold() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_regime_change_keys() -> Vec<RegimeKey> {
    vec![RegimeKey::Equity]
}

fn default_min_trade_notional_usd() -> Decimal {
    Decimal::new(25, 0) // $25
}

fn default_rebalance_dust_shares_threshold() -> Decimal {
    Decimal::new(1, 0) // < 1 share is dust
}

fn default_contract_multiplier() -> Decimal {
    Decimal::new(100, 0)
}

fn default_underlyings() -> Vec<String> {
    vec!["SPY".to_string(), "QQQ".to_string(), "IWM".to_string()]
}

fn default_universe_symbols() -> Vec<String> {
    ["SPY", "QQQ", "IWM", "TLT", "GLD", "SPLG", "QQQM"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_insurance_sleeve() -> SleeveConfig {
    SleeveConfig {
        enabled: true,
        spend_pct: Decimal::new(50, 2), // half the reserve pool
        min_months_to_expiry: 2,
        max_months_to_expiry: 6,
        target_months_to_expiry: 3,
        min_moneyness: Decimal::new(80, 2),
        max_moneyness: Decimal::new(95, 2),
        target_moneyness: Decimal::new(90, 2), // 10% OTM puts
        premium_buffer: Decimal::new(10, 2),
        close_within_days: 21,
        allow_expire: false,
    }
}

fn default_growth_sleeve() -> SleeveConfig {
    SleeveConfig {
        enabled: true,
        spend_pct: Decimal::new(50, 2),
        min_months_to_expiry: 3,
        max_months_to_expiry: 12,
        target_months_to_expiry: 6,
        min_moneyness: Decimal::new(100, 2),
        max_moneyness: Decimal::new(115, 2),
        target_moneyness: Decimal::new(105, 2), // 5% OTM calls
        premium_buffer: Decimal::new(10, 2),
        close_within_days: 30,
        allow_expire: false,
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("SLEEVES"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let unit = |v: Decimal| v >= Decimal::ZERO && v <= Decimal::ONE;

        anyhow::ensure!(
            !self.environment.is_empty() && !self.account_key.is_empty(),
            "environment and account_key must be set"
        );

        anyhow::ensure!(
            unit(self.capital.core_pct) && unit(self.capital.reserve_pct),
            "core_pct and reserve_pct must be between 0 and 1"
        );
        anyhow::ensure!(
            self.capital.core_pct + self.capital.reserve_pct == Decimal::ONE,
            "core_pct + reserve_pct must equal 1 (got {})",
            self.capital.core_pct + self.capital.reserve_pct
        );
        anyhow::ensure!(
            unit(self.capital.floor_cap_pct),
            "floor_cap_pct must be between 0 and 1"
        );
        for step in &self.capital.exposure_caps {
            anyhow::ensure!(
                unit(step.min_confidence) && unit(step.cap_pct),
                "exposure cap steps must be within 0 and 1"
            );
        }
        anyhow::ensure!(
            self.capital
                .exposure_caps
                .windows(2)
                .all(|w| w[0].min_confidence < w[1].min_confidence),
            "exposure_caps must be strictly ordered by min_confidence"
        );

        anyhow::ensure!(
            self.risk.max_trades_per_run >= 1,
            "max_trades_per_run must be >= 1"
        );
        anyhow::ensure!(
            unit(self.risk.max_weekly_drawdown_pct)
                && unit(self.risk.max_position_pct)
                && unit(self.risk.min_cash_buffer_pct),
            "risk percentages must be between 0 and 1"
        );

        anyhow::ensure!(
            self.rebalance.portfolio_drift_threshold > Decimal::ZERO
                && self.rebalance.position_drift_threshold > Decimal::ZERO,
            "drift thresholds must be positive"
        );

        anyhow::ensure!(
            self.options.contract_multiplier > Decimal::ZERO,
            "contract_multiplier must be positive"
        );
        for (name, sleeve) in [
            ("insurance", &self.options.insurance),
            ("growth", &self.options.growth),
        ] {
            anyhow::ensure!(unit(sleeve.spend_pct), "{name}.spend_pct must be between 0 and 1");
            anyhow::ensure!(
                sleeve.min_months_to_expiry <= sleeve.max_months_to_expiry,
                "{name}: min_months_to_expiry must be <= max_months_to_expiry"
            );
            anyhow::ensure!(
                sleeve.min_moneyness > Decimal::ZERO
                    && sleeve.min_moneyness <= sleeve.max_moneyness,
                "{name}: moneyness window is invalid"
            );
        }

        anyhow::ensure!(!self.universe.symbols.is_empty(), "universe must not be empty");
        let universe: HashSet<&str> = self.universe.symbols.iter().map(String::as_str).collect();
        anyhow::ensure!(
            universe.len() == self.universe.symbols.len(),
            "universe contains duplicate symbols"
        );
        for (proxy, parent) in &self.universe.proxy_parents {
            anyhow::ensure!(
                universe.contains(proxy.as_str()) && universe.contains(parent.as_str()),
                "proxy mapping {proxy} -> {parent} references a symbol outside the universe"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            account_key: default_account_key(),
            state_store: StateStoreConfig::default(),
            capital: CapitalConfig::default(),
            risk: RiskConfig::default(),
            rebalance: RebalanceConfig::default(),
            options: OptionsConfig::default(),
            universe: UniverseConfig::default(),
        }
    }
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            core_pct: default_core_pct(),
            reserve_pct: default_reserve_pct(),
            exposure_caps: default_exposure_caps(),
            floor_cap_pct: default_floor_cap_pct(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_trades_per_run: default_max_trades_per_run(),
            max_weekly_drawdown_pct: default_max_weekly_drawdown_pct(),
            max_notional_traded_pct_per_run: default_max_notional_traded_pct_per_run(),
            min_hold_hours: default_min_hold_hours(),
            max_position_pct: default_max_position_pct(),
            min_cash_buffer_pct: default_min_cash_buffer_pct(),
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            portfolio_drift_threshold: default_portfolio_drift_threshold(),
            position_drift_threshold: default_position_drift_threshold(),
            always_rebalance_on_regime_change: true,
            regime_change_keys: default_regime_change_keys(),
            full_exit_removed_symbols: true,
            min_trade_notional_usd: default_min_trade_notional_usd(),
            rebalance_dust_shares_threshold: default_rebalance_dust_shares_threshold(),
            allow_fractional_shares: false,
        }
    }
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            contract_multiplier: default_contract_multiplier(),
            underlyings: default_underlyings(),
            hedge_preferred: Vec::new(),
            growth_preferred: Vec::new(),
            growth_min_confidence: None,
            insurance: default_insurance_sleeve(),
            growth: default_growth_sleeve(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        let mut proxy_parents = BTreeMap::new();
        proxy_parents.insert("SPLG".to_string(), "SPY".to_string());
        proxy_parents.insert("QQQM".to_string(), "QQQ".to_string());
        Self {
            symbols: default_universe_symbols(),
            proxy_parents,
        }
    }
}
