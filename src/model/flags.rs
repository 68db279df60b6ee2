//! Typed diagnostic flags emitted by the rebalance engine, the option
//! sleeves and the cycle planner.
//!
//! Every flag carries a closed `code` (the serde tag of [`FlagDetail`]) and a
//! structured payload, so downstream consumers never parse free-form maps.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{OrderSide, SleeveTag};

/// Flag severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Structured payload, one variant per flag code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagDetail {
    // Rebalance engine
    BaseRebalanceFrozen {
        suppressed_sells: usize,
    },
    SellCappedDueToSleeveProtection {
        symbol: String,
        requested_qty: Decimal,
        capped_qty: Decimal,
        protected_qty: Decimal,
    },
    DustOrderDropped {
        symbol: String,
        side: OrderSide,
        notional_usd: Decimal,
        min_notional_usd: Decimal,
    },
    DustPositionIgnored {
        symbol: String,
        quantity: Decimal,
    },
    MissingPrice {
        symbol: String,
    },
    ProxySubstituted {
        parent: String,
        proxy: String,
    },
    RegimeChanged {
        key: String,
        from: String,
        to: String,
    },

    // Option sleeves
    SleeveNotAllowed {
        sleeve: SleeveTag,
    },
    ArbitratorVeto {
        sleeve: SleeveTag,
        contract_symbol: String,
    },
    CloseDeferredSameDay {
        sleeve: SleeveTag,
    },
    NearExpiryAllowExpire {
        sleeve: SleeveTag,
        days_to_expiry: i64,
    },
    NearExpiryClose {
        sleeve: SleeveTag,
        days_to_expiry: i64,
    },
    SleeveHolding {
        sleeve: SleeveTag,
        days_to_expiry: i64,
    },
    SleeveOpened {
        sleeve: SleeveTag,
        contract_symbol: String,
        contracts: u32,
        premium_usd: Decimal,
    },
    SleeveReconciled {
        sleeve: SleeveTag,
        contract_symbol: String,
    },
    UnwindPending {
        sleeve: SleeveTag,
        contract_symbol: String,
    },
    DeployedPositionMissing {
        sleeve: SleeveTag,
        contract_symbol: String,
    },
    NoUnderlyingAvailable {
        sleeve: SleeveTag,
        tried: Vec<String>,
    },
    NoContractAvailable {
        sleeve: SleeveTag,
        underlying: String,
    },
    ChainFetchFailed {
        sleeve: SleeveTag,
        underlying: String,
        error: String,
    },
    BudgetInsufficient {
        sleeve: SleeveTag,
        available_usd: Decimal,
        premium_per_contract: Decimal,
    },

    // Cycle planner
    BuyOrdersClamped {
        requested_usd: Decimal,
        budget_usd: Decimal,
    },
    SleeveStateNotPersisted {
        sleeve: SleeveTag,
    },
}

impl FlagDetail {
    /// Closed code string, identical to the serialized tag.
    pub fn code(&self) -> &'static str {
        match self {
            FlagDetail::BaseRebalanceFrozen { .. } => "BASE_REBALANCE_FROZEN",
            FlagDetail::SellCappedDueToSleeveProtection { .. } => {
                "SELL_CAPPED_DUE_TO_SLEEVE_PROTECTION"
            }
            FlagDetail::DustOrderDropped { .. } => "DUST_ORDER_DROPPED",
            FlagDetail::DustPositionIgnored { .. } => "DUST_POSITION_IGNORED",
            FlagDetail::MissingPrice { .. } => "MISSING_PRICE",
            FlagDetail::ProxySubstituted { .. } => "PROXY_SUBSTITUTED",
            FlagDetail::RegimeChanged { .. } => "REGIME_CHANGED",
            FlagDetail::SleeveNotAllowed { .. } => "SLEEVE_NOT_ALLOWED",
            FlagDetail::ArbitratorVeto { .. } => "ARBITRATOR_VETO",
            FlagDetail::CloseDeferredSameDay { .. } => "CLOSE_DEFERRED_SAME_DAY",
            FlagDetail::NearExpiryAllowExpire { .. } => "NEAR_EXPIRY_ALLOW_EXPIRE",
            FlagDetail::NearExpiryClose { .. } => "NEAR_EXPIRY_CLOSE",
            FlagDetail::SleeveHolding { .. } => "SLEEVE_HOLDING",
            FlagDetail::SleeveOpened { .. } => "SLEEVE_OPENED",
            FlagDetail::SleeveReconciled { .. } => "SLEEVE_RECONCILED",
            FlagDetail::UnwindPending { .. } => "UNWIND_PENDING",
            FlagDetail::DeployedPositionMissing { .. } => "DEPLOYED_POSITION_MISSING",
            FlagDetail::NoUnderlyingAvailable { .. } => "NO_UNDERLYING_AVAILABLE",
            FlagDetail::NoContractAvailable { .. } => "NO_CONTRACT_AVAILABLE",
            FlagDetail::ChainFetchFailed { .. } => "CHAIN_FETCH_FAILED",
            FlagDetail::BudgetInsufficient { .. } => "BUDGET_INSUFFICIENT",
            FlagDetail::BuyOrdersClamped { .. } => "BUY_ORDERS_CLAMPED",
            FlagDetail::SleeveStateNotPersisted { .. } => "SLEEVE_STATE_NOT_PERSISTED",
        }
    }

    /// Default severity for this code.
    pub fn severity(&self) -> Severity {
        match self {
            FlagDetail::MissingPrice { .. }
            | FlagDetail::SellCappedDueToSleeveProtection { .. }
            | FlagDetail::BaseRebalanceFrozen { .. }
            | FlagDetail::NearExpiryAllowExpire { .. }
            | FlagDetail::UnwindPending { .. }
            | FlagDetail::DeployedPositionMissing { .. }
            | FlagDetail::ChainFetchFailed { .. }
            | FlagDetail::BuyOrdersClamped { .. } => Severity::Warn,
            FlagDetail::SleeveStateNotPersisted { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }

    fn message(&self) -> String {
        match self {
            FlagDetail::BaseRebalanceFrozen { suppressed_sells } => format!(
                "base rebalance frozen while overlay is active; {} sell(s) suppressed",
                suppressed_sells
            ),
            FlagDetail::SellCappedDueToSleeveProtection {
                symbol,
                requested_qty,
                capped_qty,
                ..
            } => format!(
                "sell of {} capped from {} to {} to protect overlay shares",
                symbol, requested_qty, capped_qty
            ),
            FlagDetail::DustOrderDropped {
                symbol, notional_usd, ..
            } => format!("{} order of ${:.2} dropped as dust", symbol, notional_usd),
            FlagDetail::DustPositionIgnored { symbol, quantity } => {
                format!("{} residual of {} shares rounded to zero", symbol, quantity)
            }
            FlagDetail::MissingPrice { symbol } => format!("no price for {}", symbol),
            FlagDetail::ProxySubstituted { parent, proxy } => {
                format!("buying {} as proxy for {}", proxy, parent)
            }
            FlagDetail::RegimeChanged { key, from, to } => {
                format!("{} regime changed {} -> {}", key, from, to)
            }
            FlagDetail::SleeveNotAllowed { sleeve } => {
                format!("{} sleeve not allowed by arbitrator", sleeve)
            }
            FlagDetail::ArbitratorVeto {
                sleeve,
                contract_symbol,
            } => format!(
                "{} sleeve vetoed by arbitrator; closing {}",
                sleeve, contract_symbol
            ),
            FlagDetail::CloseDeferredSameDay { sleeve } => format!(
                "{} sleeve opened today; close deferred to a later run",
                sleeve
            ),
            FlagDetail::NearExpiryAllowExpire {
                sleeve,
                days_to_expiry,
            } => format!(
                "{} sleeve near expiry ({}d), allow expire",
                sleeve, days_to_expiry
            ),
            FlagDetail::NearExpiryClose {
                sleeve,
                days_to_expiry,
            } => format!("{} sleeve near expiry ({}d), closing", sleeve, days_to_expiry),
            FlagDetail::SleeveHolding {
                sleeve,
                days_to_expiry,
            } => format!("{} sleeve holding ({}d to expiry)", sleeve, days_to_expiry),
            FlagDetail::SleeveOpened {
                sleeve,
                contract_symbol,
                contracts,
                premium_usd,
            } => format!(
                "{} sleeve opening {} x {} for ${:.2}",
                sleeve, contracts, contract_symbol, premium_usd
            ),
            FlagDetail::SleeveReconciled {
                sleeve,
                contract_symbol,
            } => format!(
                "{} sleeve reset: {} no longer held at broker",
                sleeve, contract_symbol
            ),
            FlagDetail::UnwindPending {
                sleeve,
                contract_symbol,
            } => format!(
                "{} sleeve unwinding; {} still held at broker",
                sleeve, contract_symbol
            ),
            FlagDetail::DeployedPositionMissing {
                sleeve,
                contract_symbol,
            } => format!(
                "{} sleeve reset: deployed contract {} not found at broker",
                sleeve, contract_symbol
            ),
            FlagDetail::NoUnderlyingAvailable { sleeve, tried } => format!(
                "{} sleeve: no usable underlying (tried {})",
                sleeve,
                tried.join(",")
            ),
            FlagDetail::NoContractAvailable { sleeve, underlying } => {
                format!("{} sleeve: no contract available on {}", sleeve, underlying)
            }
            FlagDetail::ChainFetchFailed {
                sleeve,
                underlying,
                error,
            } => format!(
                "{} sleeve: chain fetch for {} failed: {}",
                sleeve, underlying, error
            ),
            FlagDetail::BudgetInsufficient {
                sleeve,
                available_usd,
                premium_per_contract,
            } => format!(
                "{} sleeve: budget insufficient for 1 contract (${:.2} available, ${:.2} per contract)",
                sleeve, available_usd, premium_per_contract
            ),
            FlagDetail::BuyOrdersClamped {
                requested_usd,
                budget_usd,
            } => format!(
                "buy orders scaled from ${:.2} to ${:.2}",
                requested_usd, budget_usd
            ),
            FlagDetail::SleeveStateNotPersisted { sleeve } => format!(
                "{} sleeve state not persisted because the plan was rejected",
                sleeve
            ),
        }
    }
}

/// A diagnostic flag with severity and human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub severity: Severity,
    pub message: String,
    pub detail: FlagDetail,
}

impl Flag {
    pub fn new(detail: FlagDetail) -> Self {
        Self {
            severity: detail.severity(),
            message: detail.message(),
            detail,
        }
    }

    pub fn code(&self) -> &'static str {
        self.detail.code()
    }

    /// Emit as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            Severity::Info => info!(target: "sleeve_flag", "FLAG: {}", json),
            Severity::Warn => warn!(target: "sleeve_flag", "FLAG: {}", json),
            Severity::Error => error!(target: "sleeve_flag", "FLAG: {}", json),
        }
    }
}

impl From<FlagDetail> for Flag {
    fn from(detail: FlagDetail) -> Self {
        Flag::new(detail)
    }
}

/// True if any flag in the list carries `code`.
pub fn has_flag(flags: &[Flag], code: &str) -> bool {
    flags.iter().any(|f| f.code() == code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_code_matches_serialized_tag() {
        let flag = Flag::new(FlagDetail::SellCappedDueToSleeveProtection {
            symbol: "SPY".to_string(),
            requested_qty: dec!(3),
            capped_qty: dec!(1),
            protected_qty: dec!(2),
        });
        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["detail"]["code"], flag.code());
        assert_eq!(json["severity"], "warn");
    }

    #[test]
    fn test_missing_position_flag() {
        let flag = Flag::new(FlagDetail::DeployedPositionMissing {
            sleeve: SleeveTag::Insurance,
            contract_symbol: "SPY260609P00450000".to_string(),
        });
        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["detail"]["code"], "DEPLOYED_POSITION_MISSING");
        assert_eq!(json["severity"], "warn");
        assert!(flag.message.contains("SPY260609P00450000"));
    }

    #[test]
    fn test_has_flag() {
        let flags = vec![Flag::new(FlagDetail::BaseRebalanceFrozen { suppressed_sells: 2 })];
        assert!(has_flag(&flags, "BASE_REBALANCE_FROZEN"));
        assert!(!has_flag(&flags, "MISSING_PRICE"));
    }
}
