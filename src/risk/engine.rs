//! Account-level risk battery.
//!
//! Every check runs regardless of earlier failures so the caller sees the
//! whole list of problems at once. Nothing here has side effects.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::config::{RiskConfig, UniverseConfig};
use crate::model::{OrderSide, PortfolioState, TradeOrder};
use crate::utils::safe_div;

/// Orders proposed for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub as_of: DateTime<Utc>,
    pub orders: Vec<TradeOrder>,
}

/// Mutable risk inputs tracked outside the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    /// Current weekly drawdown from peak (0.0-1.0)
    pub drawdown: Decimal,
}

/// A single constraint violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RiskViolation {
    TooManyTrades {
        count: usize,
        max: usize,
    },
    DrawdownLimitBreached {
        drawdown: Decimal,
        limit: Decimal,
        blocked_buys: usize,
    },
    TurnoverCapExceeded {
        turnover_pct: Decimal,
        limit: Decimal,
    },
    MinHoldNotSatisfied {
        symbol: String,
        held_hours: i64,
        min_hours: u32,
    },
    PositionLimitExceeded {
        symbol: String,
        position_pct: Decimal,
        limit: Decimal,
    },
    CashBufferBreached {
        cash_after: Decimal,
        required: Decimal,
    },
    OutsideUniverse {
        symbol: String,
    },
    ShortSaleProhibited {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },
}

impl fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyTrades { count, max } => {
                write!(f, "Too many trades: {} orders exceeds max {}", count, max)
            }
            Self::DrawdownLimitBreached {
                drawdown,
                limit,
                blocked_buys,
            } => write!(
                f,
                "Drawdown limit breached: {:.2}% > {:.2}%, {} buy order(s) blocked",
                drawdown * Decimal::from(100),
                limit * Decimal::from(100),
                blocked_buys
            ),
            Self::TurnoverCapExceeded {
                turnover_pct,
                limit,
            } => write!(
                f,
                "Turnover cap exceeded: {:.2}% > {:.2}% of equity",
                turnover_pct * Decimal::from(100),
                limit * Decimal::from(100)
            ),
            Self::MinHoldNotSatisfied {
                symbol,
                held_hours,
                min_hours,
            } => write!(
                f,
                "Min hold not satisfied for {}: held {}h < {}h",
                symbol, held_hours, min_hours
            ),
            Self::PositionLimitExceeded {
                symbol,
                position_pct,
                limit,
            } => write!(
                f,
                "Position limit exceeded for {}: {:.2}% > {:.2}% of equity",
                symbol,
                position_pct * Decimal::from(100),
                limit * Decimal::from(100)
            ),
            Self::CashBufferBreached {
                cash_after,
                required,
            } => write!(
                f,
                "Cash buffer breached: ${:.2} after execution < ${:.2} required",
                cash_after, required
            ),
            Self::OutsideUniverse { symbol } => {
                write!(f, "Symbol {} is outside the configured universe", symbol)
            }
            Self::ShortSaleProhibited {
                symbol,
                requested,
                held,
            } => write!(
                f,
                "Short sale prohibited for {}: selling {} with {} held",
                symbol, requested, held
            ),
        }
    }
}

/// Outcome of a risk evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub approved: bool,
    pub blocked_reasons: Vec<String>,
    pub violations: Vec<RiskViolation>,
}

impl RiskReport {
    fn from_violations(violations: Vec<RiskViolation>) -> Self {
        Self {
            approved: violations.is_empty(),
            blocked_reasons: violations.iter().map(ToString::to_string).collect(),
            violations,
        }
    }

    /// Emit rejections as structured log lines.
    pub fn emit(&self) {
        if self.approved {
            debug!(target: "risk_alert", "Risk check approved");
            return;
        }
        let json = serde_json::to_string(&self.violations).unwrap_or_default();
        warn!(target: "risk_alert", "RISK_REJECTED: {}", json);
    }
}

/// Evaluate `intent` against every configured constraint.
pub fn evaluate_risk(
    intent: &TradeIntent,
    config: &RiskConfig,
    portfolio: &PortfolioState,
    risk_state: &RiskState,
    universe: &UniverseConfig,
) -> RiskReport {
    let mut violations = Vec::new();
    let orders = &intent.orders;

    if orders.len() > config.max_trades_per_run {
        violations.push(RiskViolation::TooManyTrades {
            count: orders.len(),
            max: config.max_trades_per_run,
        });
    }

    let buys = orders.iter().filter(|o| o.is_buy()).count();
    if risk_state.drawdown > config.max_weekly_drawdown_pct && buys > 0 {
        violations.push(RiskViolation::DrawdownLimitBreached {
            drawdown: risk_state.drawdown,
            limit: config.max_weekly_drawdown_pct,
            blocked_buys: buys,
        });
    }

    let traded: Decimal = orders.iter().map(|o| o.notional_usd().abs()).sum();
    let turnover_pct = safe_div(traded, portfolio.equity);
    if !orders.is_empty()
        && (portfolio.equity <= Decimal::ZERO
            || turnover_pct > config.max_notional_traded_pct_per_run)
    {
        violations.push(RiskViolation::TurnoverCapExceeded {
            turnover_pct,
            limit: config.max_notional_traded_pct_per_run,
        });
    }

    check_sells(intent, config, portfolio, &mut violations);
    check_position_limits(orders, config, portfolio, &mut violations);
    check_cash_buffer(orders, config, portfolio, &mut violations);
    check_universe(orders, universe, &mut violations);

    let report = RiskReport::from_violations(violations);
    debug!(
        orders = orders.len(),
        approved = report.approved,
        violations = report.violations.len(),
        "Risk evaluation complete"
    );
    report
}

/// Min-hold and short-sale checks for SELL orders.
fn check_sells(
    intent: &TradeIntent,
    config: &RiskConfig,
    portfolio: &PortfolioState,
    violations: &mut Vec<RiskViolation>,
) {
    // Aggregate per symbol so split sells can't sneak past the short check.
    let mut sell_qty: HashMap<&str, Decimal> = HashMap::new();
    for order in intent.orders.iter().filter(|o| o.side == OrderSide::Sell) {
        *sell_qty.entry(order.symbol.as_str()).or_default() += order.quantity();
    }

    let mut symbols: Vec<&str> = sell_qty.keys().copied().collect();
    symbols.sort_unstable();

    for symbol in symbols {
        let requested = sell_qty[symbol];
        let held = match portfolio.option_position(symbol) {
            Some(position) => Decimal::from(position.contracts),
            None => portfolio
                .holding(symbol)
                .map(|h| h.quantity)
                .unwrap_or(Decimal::ZERO),
        };

        if requested > held {
            violations.push(RiskViolation::ShortSaleProhibited {
                symbol: symbol.to_string(),
                requested,
                held,
            });
        }

        if let Some(holding) = portfolio.holding(symbol) {
            let held_for = intent.as_of - holding.hold_since;
            if held_for < Duration::hours(i64::from(config.min_hold_hours)) {
                violations.push(RiskViolation::MinHoldNotSatisfied {
                    symbol: symbol.to_string(),
                    held_hours: held_for.num_hours(),
                    min_hours: config.min_hold_hours,
                });
            }
        }
    }
}

/// Post-trade single-position limit for ETF buys.
fn check_position_limits(
    orders: &[TradeOrder],
    config: &RiskConfig,
    portfolio: &PortfolioState,
    violations: &mut Vec<RiskViolation>,
) {
    let mut bought: HashMap<&str, (Decimal, Decimal)> = HashMap::new();
    for order in orders.iter().filter(|o| o.is_buy() && !o.is_option()) {
        let entry = bought
            .entry(order.symbol.as_str())
            .or_insert((Decimal::ZERO, order.reference_price));
        entry.0 += order.notional_usd();
    }

    let mut symbols: Vec<&str> = bought.keys().copied().collect();
    symbols.sort_unstable();

    for symbol in symbols {
        let (added, price) = bought[symbol];
        let existing = portfolio
            .holding(symbol)
            .map(|h| h.quantity * price)
            .unwrap_or(Decimal::ZERO);
        let position_pct = safe_div(existing + added, portfolio.equity);
        if position_pct > config.max_position_pct {
            violations.push(RiskViolation::PositionLimitExceeded {
                symbol: symbol.to_string(),
                position_pct,
                limit: config.max_position_pct,
            });
        }
    }
}

fn check_cash_buffer(
    orders: &[TradeOrder],
    config: &RiskConfig,
    portfolio: &PortfolioState,
    violations: &mut Vec<RiskViolation>,
) {
    if orders.iter().all(|o| !o.is_buy()) {
        return;
    }
    let spend: Decimal = orders
        .iter()
        .map(|o| match o.side {
            OrderSide::Buy => o.notional_usd(),
            OrderSide::Sell => -o.notional_usd(),
        })
        .sum();
    let cash_after = portfolio.cash - spend;
    let required = portfolio.equity * config.min_cash_buffer_pct;
    if cash_after < required {
        violations.push(RiskViolation::CashBufferBreached {
            cash_after,
            required,
        });
    }
}

fn check_universe(
    orders: &[TradeOrder],
    universe: &UniverseConfig,
    violations: &mut Vec<RiskViolation>,
) {
    let allowed: HashSet<&str> = universe.symbols.iter().map(String::as_str).collect();
    let mut reported = HashSet::new();
    for order in orders {
        let symbol = order.universe_symbol();
        if !allowed.contains(symbol) && reported.insert(symbol) {
            violations.push(RiskViolation::OutsideUniverse {
                symbol: symbol.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Holding, OptionAction, OptionLeg, OptionPosition, OptionRight, SleeveTag};
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
    }

    fn config() -> RiskConfig {
        RiskConfig {
            max_trades_per_run: 4,
            max_weekly_drawdown_pct: dec!(0.1),
            max_notional_traded_pct_per_run: dec!(0.5),
            min_hold_hours: 24,
            max_position_pct: dec!(0.4),
            min_cash_buffer_pct: dec!(0.01),
        }
    }

    fn universe() -> UniverseConfig {
        UniverseConfig {
            symbols: ["SPY", "QQQ", "IWM", "TLT", "GLD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            proxy_parents: Default::default(),
        }
    }

    fn portfolio() -> PortfolioState {
        PortfolioState {
            cash: dec!(50000),
            equity: dec!(100000),
            holdings: vec![Holding {
                symbol: "TLT".to_string(),
                quantity: dec!(100),
                avg_price: dec!(90),
                hold_since: now() - Duration::days(10),
            }],
            option_positions: vec![],
        }
    }

    fn intent(orders: Vec<TradeOrder>) -> TradeIntent {
        TradeIntent {
            as_of: now(),
            orders,
        }
    }

    fn buy(symbol: &str, usd: Decimal) -> TradeOrder {
        TradeOrder::notional(symbol, OrderSide::Buy, usd, dec!(100))
    }

    #[test]
    fn test_clean_intent_approved() {
        let report = evaluate_risk(
            &intent(vec![buy("SPY", dec!(5000)), buy("QQQ", dec!(5000))]),
            &config(),
            &portfolio(),
            &RiskState::default(),
            &universe(),
        );
        assert!(report.approved, "{:?}", report.blocked_reasons);
        assert!(report.blocked_reasons.is_empty());
    }

    #[test]
    fn test_too_many_trades() {
        let orders = (0..5).map(|_| buy("SPY", dec!(100))).collect();
        let report = evaluate_risk(
            &intent(orders),
            &config(),
            &portfolio(),
            &RiskState::default(),
            &universe(),
        );
        assert!(!report.approved);
        assert!(report
            .blocked_reasons
            .iter()
            .any(|r| r.to_lowercase().contains("too many trades")));
    }

    #[test]
    fn test_drawdown_blocks_buys_but_not_sells() {
        let state = RiskState { drawdown: dec!(0.2) };

        let report = evaluate_risk(
            &intent(vec![buy("SPY", dec!(1000))]),
            &config(),
            &portfolio(),
            &state,
            &universe(),
        );
        assert!(!report.approved);
        assert!(report
            .blocked_reasons
            .iter()
            .any(|r| r.to_lowercase().contains("drawdown limit")));

        let sell = TradeOrder::shares("TLT", OrderSide::Sell, dec!(10), dec!(90));
        let report = evaluate_risk(&intent(vec![sell]), &config(), &portfolio(), &state, &universe());
        assert!(report.approved, "{:?}", report.blocked_reasons);
    }

    #[test]
    fn test_checks_do_not_short_circuit() {
        let mut orders: Vec<TradeOrder> = (0..4).map(|_| buy("SPY", dec!(20000))).collect();
        orders.push(buy("ARKK", dec!(100)));
        let report = evaluate_risk(
            &intent(orders),
            &config(),
            &portfolio(),
            &RiskState { drawdown: dec!(0.3) },
            &universe(),
        );
        let kinds: Vec<&RiskViolation> = report.violations.iter().collect();
        assert!(kinds.iter().any(|v| matches!(v, RiskViolation::TooManyTrades { .. })));
        assert!(kinds.iter().any(|v| matches!(v, RiskViolation::DrawdownLimitBreached { .. })));
        assert!(kinds.iter().any(|v| matches!(v, RiskViolation::TurnoverCapExceeded { .. })));
        assert!(kinds.iter().any(|v| matches!(v, RiskViolation::PositionLimitExceeded { .. })));
        assert!(kinds.iter().any(|v| matches!(v, RiskViolation::CashBufferBreached { .. })));
        assert!(kinds.iter().any(|v| matches!(v, RiskViolation::OutsideUniverse { .. })));
        assert_eq!(report.blocked_reasons.len(), report.violations.len());
    }

    #[test]
    fn test_min_hold_blocks_recent_sell() {
        let mut portfolio = portfolio();
        portfolio.holdings[0].hold_since = now() - Duration::hours(3);
        let sell = TradeOrder::shares("TLT", OrderSide::Sell, dec!(10), dec!(90));
        let report = evaluate_risk(&intent(vec![sell]), &config(), &portfolio, &RiskState::default(), &universe());
        assert!(!report.approved);
        assert!(report.blocked_reasons[0].starts_with("Min hold not satisfied"));
    }

    #[test]
    fn test_short_sale_prohibited() {
        let oversell = TradeOrder::shares("TLT", OrderSide::Sell, dec!(150), dec!(90));
        let naked = TradeOrder::shares("GLD", OrderSide::Sell, dec!(1), dec!(180));
        let report = evaluate_risk(
            &intent(vec![oversell, naked]),
            &config(),
            &portfolio(),
            &RiskState::default(),
            &universe(),
        );
        let shorts = report
            .violations
            .iter()
            .filter(|v| matches!(v, RiskViolation::ShortSaleProhibited { .. }))
            .count();
        assert_eq!(shorts, 2);
    }

    #[test]
    fn test_option_close_checked_against_contracts() {
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
        let mut portfolio = portfolio();
        portfolio.option_positions.push(OptionPosition {
            symbol: "QQQ260619P00400000".to_string(),
            underlying: "QQQ".to_string(),
            right: OptionRight::Put,
            strike: dec!(400),
            expiry,
            contracts: 2,
            mark_value_usd: dec!(800),
            days_to_expiry: None,
        });
        let leg = OptionLeg {
            underlying: "QQQ".to_string(),
            right: OptionRight::Put,
            strike: dec!(400),
            expiry,
            multiplier: dec!(100),
            action: OptionAction::SellToClose,
        };
        let close = TradeOrder::option(
            "QQQ260619P00400000",
            OrderSide::Sell,
            2,
            dec!(4),
            leg,
            SleeveTag::Insurance,
        );
        let report = evaluate_risk(&intent(vec![close]), &config(), &portfolio, &RiskState::default(), &universe());
        assert!(report.approved, "{:?}", report.blocked_reasons);
    }
}
