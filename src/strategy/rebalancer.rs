//! Drift-gated rebalancing of the core ETF sleeve.
//!
//! Weights are measured against NAV. A rebalance only runs when drift,
//! a regime change, or a removed symbol triggers it; otherwise the result is
//! `SKIPPED_NO_DRIFT` with no orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::capital::{buy_notional, clamp_buy_orders_to_budget, core_buy_budget};
use crate::config::RebalanceConfig;
use crate::model::{
    Flag, FlagDetail, Holding, OrderSide, PortfolioState, QuoteMap, RegimeContext,
    SleevePosition, TradeOrder,
};
use crate::utils::{round_down_to_lot, safe_div};

use super::ProxyMap;

/// Target allocation produced by the strategy layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetPlan {
    /// Symbol → share of the investable budget (sums to <= 1)
    pub weights: BTreeMap<String, Decimal>,
}

/// Overlay state that restricts base sells.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SleeveProtection {
    /// Cap sells so overlay-owned shares are never sold by the base engine
    #[serde(default)]
    pub protect_from_sells: bool,
    #[serde(default)]
    pub protected_symbols: BTreeSet<String>,
    #[serde(default)]
    pub sleeve_positions: HashMap<String, SleevePosition>,
    /// Suppress every base sell while the overlay is adding/holding
    #[serde(default)]
    pub freeze_base_rebalance: bool,
}

/// Inputs for one rebalance evaluation.
#[derive(Debug, Clone)]
pub struct RebalanceRequest<'a> {
    pub as_of: DateTime<Utc>,
    pub portfolio: &'a PortfolioState,
    pub prices: &'a QuoteMap,
    pub target: &'a TargetPlan,
    /// USD the target weights apply to (the deploy budget)
    pub investable_usd: Decimal,
    pub regimes: &'a RegimeContext,
    pub prior_regimes: Option<&'a RegimeContext>,
    pub protection: &'a SleeveProtection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceStatus {
    Ok,
    SkippedNoDrift,
}

/// Why a rebalance ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RebalanceTrigger {
    PortfolioDrift { drift: Decimal },
    PositionDrift { symbol: String, drift: Decimal },
    RegimeChange { key: String, from: String, to: String },
    RemovedSymbol { symbol: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Half the sum of absolute weight drifts
    pub portfolio: Decimal,
    pub positions: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySubstitution {
    pub parent: String,
    pub proxy: String,
    pub notional_usd: Decimal,
}

/// Outcome of a rebalance evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub status: RebalanceStatus,
    pub as_of: DateTime<Utc>,
    pub current_weights: BTreeMap<String, Decimal>,
    pub target_weights: BTreeMap<String, Decimal>,
    /// Projected weights once all orders fill
    pub achieved_weights: BTreeMap<String, Decimal>,
    pub drift: DriftReport,
    pub triggers: Vec<RebalanceTrigger>,
    pub buy_orders: Vec<TradeOrder>,
    pub sell_orders: Vec<TradeOrder>,
    /// Sells first, then buys
    pub combined_orders: Vec<TradeOrder>,
    pub leftover_cash: Decimal,
    pub substitutions: Vec<ProxySubstitution>,
    pub flags: Vec<Flag>,
}

/// Held lines of one canonical symbol (parent plus its proxy).
#[derive(Debug, Default)]
struct Group<'a> {
    lines: Vec<(&'a Holding, Decimal)>,
    value: Decimal,
}

/// Rebalances the core ETF sleeve toward a target plan.
pub struct RebalanceEngine {
    config: RebalanceConfig,
    proxies: ProxyMap,
}

impl RebalanceEngine {
    pub fn new(config: RebalanceConfig, proxies: ProxyMap) -> Self {
        Self { config, proxies }
    }

    fn lot(&self) -> Decimal {
        if self.config.allow_fractional_shares {
            dec!(0.0001)
        } else {
            Decimal::ONE
        }
    }

    /// Evaluate drift and build orders.
    pub fn rebalance(&self, req: &RebalanceRequest<'_>) -> RebalanceResult {
        let mut flags = Vec::new();

        // Group priced holdings by canonical symbol
        let mut groups: BTreeMap<String, Group<'_>> = BTreeMap::new();
        for holding in &req.portfolio.holdings {
            if holding.quantity <= Decimal::ZERO {
                continue;
            }
            let Some(price) = req.prices.get(&holding.symbol).copied() else {
                flags.push(Flag::new(FlagDetail::MissingPrice {
                    symbol: holding.symbol.clone(),
                }));
                continue;
            };
            let group = groups
                .entry(self.proxies.canonical(&holding.symbol).to_string())
                .or_default();
            group.lines.push((holding, price));
            group.value += holding.quantity * price;
        }

        let invested: Decimal = groups.values().map(|g| g.value).sum();
        let nav = if req.portfolio.equity > Decimal::ZERO {
            req.portfolio.equity
        } else {
            req.portfolio.cash + invested
        };

        let target_values: BTreeMap<String, Decimal> = req
            .target
            .weights
            .iter()
            .fold(BTreeMap::new(), |mut acc, (symbol, weight)| {
                *acc.entry(self.proxies.canonical(symbol).to_string())
                    .or_insert(Decimal::ZERO) += *weight * req.investable_usd;
                acc
            });

        let current_weights: BTreeMap<String, Decimal> = groups
            .iter()
            .map(|(symbol, g)| (symbol.clone(), safe_div(g.value, nav)))
            .collect();
        let target_weights: BTreeMap<String, Decimal> = target_values
            .iter()
            .map(|(symbol, value)| (symbol.clone(), safe_div(*value, nav)))
            .collect();

        let symbols: BTreeSet<String> = current_weights
            .keys()
            .chain(target_weights.keys())
            .cloned()
            .collect();

        let mut drift = DriftReport::default();
        for symbol in &symbols {
            let current = current_weights.get(symbol).copied().unwrap_or_default();
            let target = target_weights.get(symbol).copied().unwrap_or_default();
            let d = (current - target).abs();
            drift.portfolio += d;
            drift.positions.insert(symbol.clone(), d);
        }
        drift.portfolio /= dec!(2);

        let triggers = self.triggers(req, &drift, &groups, &target_values, &mut flags);

        debug!(
            %nav,
            portfolio_drift = %drift.portfolio,
            triggers = triggers.len(),
            "Evaluated rebalance drift"
        );

        if triggers.is_empty() {
            return RebalanceResult {
                status: RebalanceStatus::SkippedNoDrift,
                as_of: req.as_of,
                achieved_weights: current_weights.clone(),
                current_weights,
                target_weights,
                drift,
                triggers,
                buy_orders: Vec::new(),
                sell_orders: Vec::new(),
                combined_orders: Vec::new(),
                leftover_cash: req.portfolio.cash,
                substitutions: Vec::new(),
                flags,
            };
        }

        let mut sell_orders = Vec::new();
        let mut buy_orders = Vec::new();
        let mut substitutions = Vec::new();
        let mut suppressed_sells = 0usize;

        for symbol in &symbols {
            let current_value = groups.get(symbol).map(|g| g.value).unwrap_or_default();
            let target_value = target_values.get(symbol).copied();
            let delta = target_value.unwrap_or_default() - current_value;

            if delta < Decimal::ZERO {
                let Some(group) = groups.get(symbol) else {
                    continue;
                };
                let full_exit = target_value.is_none();
                for order in self.sell_group(symbol, group, -delta, full_exit, req, &mut flags) {
                    if req.protection.freeze_base_rebalance {
                        suppressed_sells += 1;
                    } else {
                        sell_orders.push(order);
                    }
                }
            } else if delta > Decimal::ZERO {
                if let Some(order) =
                    self.buy_symbol(symbol, delta, req, &mut flags, &mut substitutions)
                {
                    buy_orders.push(order);
                }
            }
        }

        if req.protection.freeze_base_rebalance {
            flags.push(Flag::new(FlagDetail::BaseRebalanceFrozen { suppressed_sells }));
        }

        // Keep buys inside the deploy budget and the cash that sells free up
        let sell_proceeds: Decimal = sell_orders.iter().map(TradeOrder::notional_usd).sum();
        let buy_budget = core_buy_budget(
            req.investable_usd,
            invested,
            req.portfolio.cash,
            sell_proceeds,
        );
        let requested = buy_notional(&buy_orders);
        if requested > buy_budget {
            flags.push(Flag::new(FlagDetail::BuyOrdersClamped {
                requested_usd: requested,
                budget_usd: buy_budget,
            }));
            buy_orders = clamp_buy_orders_to_budget(buy_orders, buy_budget, self.lot());
        }

        let buy_cost = buy_notional(&buy_orders);
        let leftover_cash = req.portfolio.cash + sell_proceeds - buy_cost;

        let achieved_weights =
            self.achieved_weights(&groups, &sell_orders, &buy_orders, nav);

        let mut combined_orders = sell_orders.clone();
        combined_orders.extend(buy_orders.iter().cloned());

        info!(
            sells = sell_orders.len(),
            buys = buy_orders.len(),
            %sell_proceeds,
            %buy_cost,
            %leftover_cash,
            "Rebalance planned"
        );

        RebalanceResult {
            status: RebalanceStatus::Ok,
            as_of: req.as_of,
            current_weights,
            target_weights,
            achieved_weights,
            drift,
            triggers,
            buy_orders,
            sell_orders,
            combined_orders,
            leftover_cash,
            substitutions,
            flags,
        }
    }

    fn triggers(
        &self,
        req: &RebalanceRequest<'_>,
        drift: &DriftReport,
        groups: &BTreeMap<String, Group<'_>>,
        target_values: &BTreeMap<String, Decimal>,
        flags: &mut Vec<Flag>,
    ) -> Vec<RebalanceTrigger> {
        let mut triggers = Vec::new();

        if drift.portfolio >= self.config.portfolio_drift_threshold {
            triggers.push(RebalanceTrigger::PortfolioDrift {
                drift: drift.portfolio,
            });
        }

        for (symbol, d) in &drift.positions {
            if *d >= self.config.position_drift_threshold {
                triggers.push(RebalanceTrigger::PositionDrift {
                    symbol: symbol.clone(),
                    drift: *d,
                });
            }
        }

        if self.config.always_rebalance_on_regime_change {
            if let Some(prior) = req.prior_regimes {
                for key in &self.config.regime_change_keys {
                    let from = prior.key_value(*key);
                    let to = req.regimes.key_value(*key);
                    if from != to {
                        flags.push(Flag::new(FlagDetail::RegimeChanged {
                            key: key.to_string(),
                            from: from.clone(),
                            to: to.clone(),
                        }));
                        triggers.push(RebalanceTrigger::RegimeChange {
                            key: key.to_string(),
                            from,
                            to,
                        });
                    }
                }
            }
        }

        if self.config.full_exit_removed_symbols {
            for symbol in groups.keys() {
                if !target_values.contains_key(symbol) {
                    triggers.push(RebalanceTrigger::RemovedSymbol {
                        symbol: symbol.clone(),
                    });
                }
            }
        }

        triggers
    }

    /// Sell orders that reduce `group` by `value` USD (everything on full exit).
    fn sell_group(
        &self,
        canonical: &str,
        group: &Group<'_>,
        value: Decimal,
        full_exit: bool,
        req: &RebalanceRequest<'_>,
        flags: &mut Vec<Flag>,
    ) -> Vec<TradeOrder> {
        let dust_shares = self.config.rebalance_dust_shares_threshold;
        let mut remaining = value;
        let mut orders = Vec::new();

        for (holding, price) in &group.lines {
            if !full_exit && remaining <= Decimal::ZERO {
                break;
            }

            let mut qty = if full_exit {
                if holding.quantity < dust_shares {
                    flags.push(Flag::new(FlagDetail::DustPositionIgnored {
                        symbol: holding.symbol.clone(),
                        quantity: holding.quantity,
                    }));
                    continue;
                }
                holding.quantity
            } else {
                let wanted = round_down_to_lot(safe_div(remaining, *price), self.lot());
                let qty = wanted.min(holding.quantity);
                let residual = holding.quantity - qty;
                // Don't leave a sliver behind
                if residual > Decimal::ZERO && residual < dust_shares {
                    holding.quantity
                } else {
                    qty
                }
            };

            qty = self.apply_sell_protection(holding, canonical, qty, req.protection, flags);
            if qty <= Decimal::ZERO {
                continue;
            }

            let notional = qty * *price;
            remaining -= notional;

            if notional < self.config.min_trade_notional_usd {
                flags.push(Flag::new(FlagDetail::DustOrderDropped {
                    symbol: holding.symbol.clone(),
                    side: OrderSide::Sell,
                    notional_usd: notional,
                    min_notional_usd: self.config.min_trade_notional_usd,
                }));
                continue;
            }

            let thesis = if full_exit {
                format!("{} removed from target plan", canonical)
            } else {
                format!("{} overweight versus target", canonical)
            };
            orders.push(
                TradeOrder::shares(&holding.symbol, OrderSide::Sell, qty, *price)
                    .with_thesis(thesis, "target weight raised again"),
            );
        }

        orders
    }

    /// Cap a sell so overlay-owned shares stay put.
    fn apply_sell_protection(
        &self,
        holding: &Holding,
        canonical: &str,
        qty: Decimal,
        protection: &SleeveProtection,
        flags: &mut Vec<Flag>,
    ) -> Decimal {
        if !protection.protect_from_sells {
            return qty;
        }
        let protected = protection.protected_symbols.contains(&holding.symbol)
            || protection.protected_symbols.contains(canonical);
        if !protected {
            return qty;
        }
        let Some(protected_qty) = protection
            .sleeve_positions
            .get(&holding.symbol)
            .or_else(|| protection.sleeve_positions.get(canonical))
            .and_then(|p| p.dislocation_qty)
        else {
            return qty;
        };

        let sellable = (holding.quantity - protected_qty).max(Decimal::ZERO);
        if qty <= sellable {
            return qty;
        }

        flags.push(Flag::new(FlagDetail::SellCappedDueToSleeveProtection {
            symbol: holding.symbol.clone(),
            requested_qty: qty,
            capped_qty: sellable,
            protected_qty,
        }));
        sellable
    }

    /// Buy order for `value` USD of `parent`, substituting its proxy when the
    /// parent cannot fill a whole share or has no price.
    fn buy_symbol(
        &self,
        parent: &str,
        value: Decimal,
        req: &RebalanceRequest<'_>,
        flags: &mut Vec<Flag>,
        substitutions: &mut Vec<ProxySubstitution>,
    ) -> Option<TradeOrder> {
        let parent_price = req.prices.get(parent).copied();
        let proxy = self
            .proxies
            .proxy_for(parent)
            .and_then(|p| req.prices.get(p).map(|price| (p, *price)));

        let parent_unfillable = match parent_price {
            None => true,
            Some(price) => !self.config.allow_fractional_shares && value < price,
        };

        let (symbol, price) = match (parent_price, proxy) {
            (_, Some((proxy_symbol, proxy_price))) if parent_unfillable => {
                flags.push(Flag::new(FlagDetail::ProxySubstituted {
                    parent: parent.to_string(),
                    proxy: proxy_symbol.to_string(),
                }));
                substitutions.push(ProxySubstitution {
                    parent: parent.to_string(),
                    proxy: proxy_symbol.to_string(),
                    notional_usd: value,
                });
                (proxy_symbol, proxy_price)
            }
            (Some(price), _) => (parent, price),
            (None, _) => {
                flags.push(Flag::new(FlagDetail::MissingPrice {
                    symbol: parent.to_string(),
                }));
                return None;
            }
        };

        let qty = round_down_to_lot(safe_div(value, price), self.lot());
        let notional = qty * price;
        if qty <= Decimal::ZERO || notional < self.config.min_trade_notional_usd {
            flags.push(Flag::new(FlagDetail::DustOrderDropped {
                symbol: symbol.to_string(),
                side: OrderSide::Buy,
                notional_usd: notional.max(value),
                min_notional_usd: self.config.min_trade_notional_usd,
            }));
            return None;
        }

        Some(
            TradeOrder::shares(symbol, OrderSide::Buy, qty, price).with_thesis(
                format!("{} underweight versus target", parent),
                "target weight cut or regime flips risk-off",
            ),
        )
    }

    fn achieved_weights(
        &self,
        groups: &BTreeMap<String, Group<'_>>,
        sells: &[TradeOrder],
        buys: &[TradeOrder],
        nav: Decimal,
    ) -> BTreeMap<String, Decimal> {
        let mut values: BTreeMap<String, Decimal> = groups
            .iter()
            .map(|(symbol, g)| (symbol.clone(), g.value))
            .collect();
        for order in sells {
            *values
                .entry(self.proxies.canonical(&order.symbol).to_string())
                .or_default() -= order.notional_usd();
        }
        for order in buys {
            *values
                .entry(self.proxies.canonical(&order.symbol).to_string())
                .or_default() += order.notional_usd();
        }
        values
            .into_iter()
            .map(|(symbol, value)| (symbol, safe_div(value.max(Decimal::ZERO), nav)))
            .collect()
    }
}
