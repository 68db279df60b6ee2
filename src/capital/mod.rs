//! Capital partitioning between the core ETF pool and the options reserve.
//!
//! The 70/30 wall is configuration: `core_pct + reserve_pct == 1` is enforced
//! by [`Config::validate`](crate::config::Config::validate). Everything here is
//! pure and deterministic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CapitalConfig, ExposureCapStep};
use crate::model::{OrderSize, TradeOrder};
use crate::utils::{clamp, round_down_to_lot, safe_div};

/// Budgets derived from NAV for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapitalBudgets {
    pub nav: Decimal,
    /// NAV share for long-only ETFs
    pub core_budget: Decimal,
    /// NAV share for options overlays
    pub reserve_budget: Decimal,
    /// Cap looked up from equity-regime confidence
    pub base_exposure_cap_pct: Decimal,
    /// External signal-strength multiplier (0.0-1.0)
    pub confidence_scale: Decimal,
    /// `base_exposure_cap_pct * confidence_scale`
    pub deploy_pct: Decimal,
    /// Deployable part of the core pool
    pub deploy_budget_usd: Decimal,
}

/// Ordered confidence → exposure cap lookup.
#[derive(Debug, Clone)]
pub struct ExposureCapTable {
    steps: Vec<ExposureCapStep>,
    floor_cap_pct: Decimal,
}

impl ExposureCapTable {
    pub fn new(mut steps: Vec<ExposureCapStep>, floor_cap_pct: Decimal) -> Self {
        steps.sort_by(|a, b| a.min_confidence.cmp(&b.min_confidence));
        Self {
            steps,
            floor_cap_pct,
        }
    }

    pub fn from_config(config: &CapitalConfig) -> Self {
        Self::new(config.exposure_caps.clone(), config.floor_cap_pct)
    }

    /// Cap of the highest step whose threshold is <= `confidence`.
    pub fn cap_for(&self, confidence: Decimal) -> Decimal {
        self.steps
            .iter()
            .rev()
            .find(|step| confidence >= step.min_confidence)
            .map(|step| step.cap_pct)
            .unwrap_or(self.floor_cap_pct)
    }
}

/// Compute core/reserve budgets and the regime-scaled deploy budget.
pub fn compute_budgets(
    nav: Decimal,
    equity_confidence: Decimal,
    confidence_scale: Decimal,
    config: &CapitalConfig,
) -> CapitalBudgets {
    let nav = nav.max(Decimal::ZERO);
    let core_budget = nav * config.core_pct;
    let reserve_budget = nav * config.reserve_pct;

    let base_exposure_cap_pct =
        clamp(ExposureCapTable::from_config(config).cap_for(equity_confidence), Decimal::ZERO, Decimal::ONE);
    let confidence_scale = clamp(confidence_scale, Decimal::ZERO, Decimal::ONE);
    let deploy_pct = base_exposure_cap_pct * confidence_scale;
    let deploy_budget_usd = core_budget * deploy_pct;

    debug!(
        %nav,
        %core_budget,
        %reserve_budget,
        %base_exposure_cap_pct,
        %confidence_scale,
        %deploy_budget_usd,
        "Computed capital budgets"
    );

    CapitalBudgets {
        nav,
        core_budget,
        reserve_budget,
        base_exposure_cap_pct,
        confidence_scale,
        deploy_pct,
        deploy_budget_usd,
    }
}

/// Total notional of BUY orders.
pub fn buy_notional(orders: &[TradeOrder]) -> Decimal {
    orders
        .iter()
        .filter(|o| o.is_buy())
        .map(TradeOrder::notional_usd)
        .sum()
}

/// Scale BUY orders proportionally so their notional fits `budget`.
///
/// SELL orders pass through. Quantity-sized orders are floored to `lot_size`
/// after scaling, so the clamped sum may land slightly under `budget`; a BUY
/// that floors to zero is dropped.
pub fn clamp_buy_orders_to_budget(
    orders: Vec<TradeOrder>,
    budget: Decimal,
    lot_size: Decimal,
) -> Vec<TradeOrder> {
    let budget = budget.max(Decimal::ZERO);
    let total = buy_notional(&orders);
    if total <= budget {
        return orders;
    }

    let scale = safe_div(budget, total);
    debug!(%total, %budget, %scale, "Scaling buy orders to budget");

    orders
        .into_iter()
        .filter_map(|mut order| {
            if !order.is_buy() {
                return Some(order);
            }
            order.size = match order.size {
                OrderSize::Notional(usd) => OrderSize::Notional(usd * scale),
                OrderSize::Quantity(qty) => OrderSize::Quantity(round_down_to_lot(qty * scale, lot_size)),
            };
            let empty = match order.size {
                OrderSize::Notional(usd) => usd.is_zero(),
                OrderSize::Quantity(qty) => qty.is_zero(),
            };
            (!empty).then_some(order)
        })
        .collect()
}

/// Remaining buy capacity of the core pool this run.
///
/// `deploy budget − core value left after sells`, bounded by cash available
/// once sells settle.
pub fn core_buy_budget(
    deploy_budget_usd: Decimal,
    invested_core_value: Decimal,
    cash: Decimal,
    sell_proceeds: Decimal,
) -> Decimal {
    let headroom = deploy_budget_usd - (invested_core_value - sell_proceeds);
    headroom.min(cash + sell_proceeds).max(Decimal::ZERO)
}
