//! One planning cycle for one account.
//!
//! NAV + regimes → budgets → core rebalance → sleeve arbitration → option
//! sleeves → risk battery. Sleeve records are read at the start and written
//! back only when the combined order set passes risk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::capital::{compute_budgets, CapitalBudgets};
use crate::config::Config;
use crate::model::{Flag, FlagDetail, PortfolioState, QuoteMap, RegimeContext, TradeOrder};
use crate::persistence::{load_or_default, SleeveStateStore, StoreKey};
use crate::risk::{evaluate_risk, RiskReport, RiskState, TradeIntent};
use crate::strategy::options::{
    ChainDataProvider, OptionSleevePlanner, OptionSleeveState, SleeveContext, SleeveKind,
    SleevePlan, SleeveStatus,
};
use crate::strategy::{
    arbitrate_sleeves, ArbitrationConfig, ProxyMap, RebalanceEngine, RebalanceRequest,
    RebalanceResult, SleeveArbitrationResult, SleeveProtection, TargetPlan,
};

/// Dislocation overlay state, consumed as input only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DislocationInput {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub protection: SleeveProtection,
}

/// Everything one cycle needs from collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInput {
    pub run_id: String,
    pub as_of: DateTime<Utc>,
    pub portfolio: PortfolioState,
    pub prices: QuoteMap,
    pub regimes: RegimeContext,
    #[serde(default)]
    pub prior_regimes: Option<RegimeContext>,
    pub target_plan: TargetPlan,
    /// Signal-strength multiplier on the exposure cap (0.0-1.0)
    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: Decimal,
    #[serde(default)]
    pub dislocation: DislocationInput,
    #[serde(default)]
    pub risk_state: RiskState,
}

fn default_confidence_scale() -> Decimal {
    Decimal::ONE
}

/// Reserve pool usage after this cycle.
///
/// `used_x` is the premium paid for sleeve x's open record as it stands after
/// this run: new opens at their committed premium, DEPLOYED and UNWINDING
/// records at cost. Mark changes never move the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReserveLedger {
    pub reserve_budget: Decimal,
    pub used_insurance: Decimal,
    pub used_growth: Decimal,
    pub used_total: Decimal,
    pub remaining: Decimal,
}

impl ReserveLedger {
    fn new(reserve_budget: Decimal, sleeves: &[SleevePlan]) -> Self {
        let used = |kind: SleeveKind| -> Decimal {
            sleeves
                .iter()
                .filter(|p| p.sleeve == kind)
                .map(|p| p.next_state.cost_basis())
                .sum()
        };
        let used_insurance = used(SleeveKind::Insurance);
        let used_growth = used(SleeveKind::Growth);
        let used_total = used_insurance + used_growth;

        Self {
            reserve_budget,
            used_insurance,
            used_growth,
            used_total,
            remaining: reserve_budget - used_total,
        }
    }
}

/// Output of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CyclePlan {
    pub run_id: String,
    pub as_of: DateTime<Utc>,
    pub budgets: CapitalBudgets,
    pub rebalance: RebalanceResult,
    pub arbitration: SleeveArbitrationResult,
    pub sleeves: Vec<SleevePlan>,
    /// Core orders (sells, then buys) followed by sleeve orders
    pub orders: Vec<TradeOrder>,
    pub risk: RiskReport,
    pub reserve: ReserveLedger,
    pub flags: Vec<Flag>,
    /// Whether sleeve records were written back
    pub persisted: bool,
}

impl CyclePlan {
    pub fn sleeve(&self, kind: SleeveKind) -> Option<&SleevePlan> {
        self.sleeves.iter().find(|p| p.sleeve == kind)
    }
}

/// Runs planning cycles against a sleeve store.
pub struct CyclePlanner {
    config: Config,
    key: StoreKey,
    proxies: ProxyMap,
    store: Arc<dyn SleeveStateStore>,
    chain: Option<Arc<dyn ChainDataProvider>>,
}

impl CyclePlanner {
    /// Validates configuration and the proxy map.
    pub fn new(config: Config, store: Arc<dyn SleeveStateStore>) -> Result<Self> {
        config.validate()?;
        let proxies = ProxyMap::new(&config.universe.proxy_parents)
            .context("Invalid universe proxy map")?;

        Ok(Self {
            key: StoreKey::from_config(&config),
            config,
            proxies,
            store,
            chain: None,
        })
    }

    /// Price contracts from a chain instead of synthetic estimates.
    pub fn with_chain(mut self, chain: Arc<dyn ChainDataProvider>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current persisted state of both sleeves.
    pub fn sleeve_states(&self) -> Result<Vec<(SleeveKind, OptionSleeveState)>> {
        SleeveKind::ALL
            .iter()
            .map(|&kind| {
                load_or_default(self.store.as_ref(), &self.key, kind)
                    .map(|state| (kind, state))
                    .with_context(|| format!("Failed to load {} sleeve state", kind))
            })
            .collect()
    }

    /// Plan one cycle.
    pub async fn run(&self, input: &CycleInput) -> Result<CyclePlan> {
        let config = &self.config;
        let portfolio = &input.portfolio;
        let mut flags = Vec::new();

        let budgets = compute_budgets(
            portfolio.equity,
            input.regimes.equity.confidence,
            input.confidence_scale,
            &config.capital,
        );

        // Core ETF sleeve
        let engine = RebalanceEngine::new(config.rebalance.clone(), self.proxies.clone());
        let rebalance = engine.rebalance(&RebalanceRequest {
            as_of: input.as_of,
            portfolio,
            prices: &input.prices,
            target: &input.target_plan,
            investable_usd: budgets.deploy_budget_usd,
            regimes: &input.regimes,
            prior_regimes: input.prior_regimes.as_ref(),
            protection: &input.dislocation.protection,
        });
        flags.extend(rebalance.flags.iter().cloned());

        // Option sleeves
        let arbitration = arbitrate_sleeves(
            input.dislocation.active,
            &input.regimes,
            &ArbitrationConfig::from(&config.options),
        );
        let sleeves = self.plan_sleeves(input, &budgets, &rebalance, &arbitration).await?;
        for plan in &sleeves {
            flags.extend(plan.flags.iter().cloned());
        }

        let mut orders = rebalance.combined_orders.clone();
        orders.extend(sleeves.iter().filter_map(|p| p.order.clone()));

        let risk = evaluate_risk(
            &TradeIntent {
                as_of: input.as_of,
                orders: orders.clone(),
            },
            &config.risk,
            portfolio,
            &input.risk_state,
            &config.universe,
        );
        risk.emit();

        let persisted = if risk.approved {
            for plan in &sleeves {
                self.store
                    .put(&self.key, plan.sleeve, &plan.next_state)
                    .with_context(|| format!("Failed to save {} sleeve state", plan.sleeve))?;
            }
            true
        } else {
            for plan in sleeves.iter().filter(|p| p.next_state.status != p.prior_status) {
                flags.push(Flag::new(FlagDetail::SleeveStateNotPersisted {
                    sleeve: plan.sleeve.tag(),
                }));
            }
            false
        };

        let reserve = ReserveLedger::new(budgets.reserve_budget, &sleeves);

        for flag in &flags {
            flag.emit();
        }

        info!(
            run_id = %input.run_id,
            nav = %budgets.nav,
            deploy_budget = %budgets.deploy_budget_usd,
            orders = orders.len(),
            approved = risk.approved,
            reserve_remaining = %reserve.remaining,
            "Cycle planned"
        );

        Ok(CyclePlan {
            run_id: input.run_id.clone(),
            as_of: input.as_of,
            budgets,
            rebalance,
            arbitration,
            sleeves,
            orders,
            risk,
            reserve,
            flags,
            persisted,
        })
    }

    async fn plan_sleeves(
        &self,
        input: &CycleInput,
        budgets: &CapitalBudgets,
        rebalance: &RebalanceResult,
        arbitration: &SleeveArbitrationResult,
    ) -> Result<Vec<SleevePlan>> {
        let allowed = |kind: SleeveKind| match kind {
            SleeveKind::Insurance => arbitration.allowed.insurance,
            SleeveKind::Growth => arbitration.allowed.growth_convexity,
        };

        // Disallowed sleeves first so a veto is settled before the other opens
        let mut order = SleeveKind::ALL.to_vec();
        order.sort_by_key(|&kind| allowed(kind));

        let mut states = Vec::with_capacity(order.len());
        for &kind in &order {
            let state = load_or_default(self.store.as_ref(), &self.key, kind)
                .with_context(|| format!("Failed to load {} sleeve state", kind))?;
            states.push((kind, state));
        }

        let loaded_cost: Vec<(SleeveKind, Decimal)> =
            states.iter().map(|(kind, state)| (*kind, state.cost_basis())).collect();
        let cash_buffer = input.portfolio.equity * self.config.risk.min_cash_buffer_pct;
        let mut committed = Decimal::ZERO;
        let mut plans: Vec<SleevePlan> = Vec::with_capacity(states.len());

        for (kind, state) in states {
            // Never deploy both overlays at once
            let other_deployed = plans
                .iter()
                .any(|p| p.sleeve != kind && p.next_state.status == SleeveStatus::Deployed);
            let permitted = allowed(kind) && !(other_deployed && !state.is_deployed());
            if allowed(kind) && !permitted {
                warn!(sleeve = %kind, "Other overlay still deployed, not opening");
            }

            // Other records at cost: planned ones as they now stand, the rest as loaded
            let in_use: Decimal = loaded_cost
                .iter()
                .filter(|(other, _)| *other != kind)
                .map(|(other, cost)| {
                    plans
                        .iter()
                        .find(|p| p.sleeve == *other)
                        .map_or(*cost, |p| p.next_state.cost_basis())
                })
                .sum();

            let planner = OptionSleevePlanner::new(kind, self.config.options.clone(), self.chain.clone());
            let ctx = SleeveContext {
                run_id: &input.run_id,
                as_of: input.as_of,
                allowed: permitted,
                portfolio: &input.portfolio,
                prices: &input.prices,
                reserve_budget: budgets.reserve_budget,
                reserve_committed: committed,
                reserve_in_use: in_use,
                cash_available: (rebalance.leftover_cash - cash_buffer - committed)
                    .max(Decimal::ZERO),
            };
            let plan = planner.plan(state, &ctx).await;
            committed += plan.premium_committed;
            plans.push(plan);
        }

        // Report in a stable order
        plans.sort_by_key(|p| p.sleeve != SleeveKind::Insurance);
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        has_flag, EquityRegimeLabel, Holding, OptionPosition, OptionRight, OrderSide,
        VolRegimeLabel,
    };
    use crate::persistence::MemorySleeveStore;
    use chrono::{Duration, NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 15, 0, 0).unwrap()
    }

    fn holding(symbol: &str, quantity: Decimal, price: Decimal) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            quantity,
            avg_price: price,
            hold_since: now() - Duration::days(30),
        }
    }

    fn input(regimes: RegimeContext, option_positions: Vec<OptionPosition>) -> CycleInput {
        let marks: Decimal = option_positions.iter().map(|p| p.mark_value_usd).sum();
        CycleInput {
            run_id: "run-2".to_string(),
            as_of: now(),
            portfolio: PortfolioState {
                cash: dec!(50000) - marks,
                equity: dec!(100000),
                holdings: vec![
                    holding("SPY", dec!(60), dec!(500)),
                    holding("TLT", dec!(200), dec!(100)),
                ],
                option_positions,
            },
            prices: [("SPY", dec!(500)), ("TLT", dec!(100)), ("QQQ", dec!(400))]
                .iter()
                .map(|(s, p)| (s.to_string(), *p))
                .collect(),
            regimes,
            prior_regimes: None,
            target_plan: TargetPlan {
                weights: [("SPY".to_string(), dec!(0.5)), ("TLT".to_string(), dec!(0.5))]
                    .into_iter()
                    .collect(),
            },
            confidence_scale: Decimal::ONE,
            dislocation: DislocationInput::default(),
            risk_state: RiskState::default(),
        }
    }

    fn risk_off() -> RegimeContext {
        RegimeContext::new(EquityRegimeLabel::RiskOff, dec!(0.8), VolRegimeLabel::High)
    }

    fn risk_on() -> RegimeContext {
        RegimeContext::new(EquityRegimeLabel::RiskOn, dec!(0.8), VolRegimeLabel::Low)
    }

    fn planner(store: Arc<MemorySleeveStore>) -> CyclePlanner {
        CyclePlanner::new(Config::default(), store).unwrap()
    }

    fn key() -> StoreKey {
        StoreKey::from_config(&Config::default())
    }

    #[tokio::test]
    async fn test_risk_off_cycle_opens_insurance() {
        let store = Arc::new(MemorySleeveStore::new());
        let plan = planner(store.clone()).run(&input(risk_off(), vec![])).await.unwrap();

        assert!(plan.risk.approved, "{:?}", plan.risk.blocked_reasons);
        assert!(plan.persisted);
        assert_eq!(plan.budgets.deploy_budget_usd, dec!(70000));

        // 10 SPY + 150 TLT, then 4 SPY puts
        assert_eq!(plan.orders.len(), 3);
        assert!(plan.orders[..2].iter().all(|o| o.side == OrderSide::Buy && !o.is_option()));
        let put = &plan.orders[2];
        assert!(put.is_option());
        assert_eq!(put.quantity(), dec!(4));

        let insurance = plan.sleeve(SleeveKind::Insurance).unwrap();
        assert_eq!(insurance.next_state.status, SleeveStatus::Deployed);
        assert!(has_flag(&plan.flags, "SLEEVE_NOT_ALLOWED"));

        assert_eq!(plan.reserve.used_insurance, dec!(12224));
        assert_eq!(plan.reserve.remaining, dec!(17776));

        let stored = store.get(&key(), SleeveKind::Insurance).unwrap().unwrap();
        assert_eq!(stored.status, SleeveStatus::Deployed);
        assert_eq!(stored.opened_run_id.as_deref(), Some("run-2"));
    }

    #[tokio::test]
    async fn test_rejected_plan_does_not_persist() {
        let store = Arc::new(MemorySleeveStore::new());
        let mut cycle = input(risk_off(), vec![]);
        cycle.risk_state.drawdown = dec!(0.2);

        let plan = planner(store.clone()).run(&cycle).await.unwrap();
        assert!(!plan.risk.approved);
        assert!(plan.risk.blocked_reasons[0].starts_with("Drawdown limit"));
        assert!(!plan.persisted);
        assert!(has_flag(&plan.flags, "SLEEVE_STATE_NOT_PERSISTED"));
        assert!(store.get(&key(), SleeveKind::Insurance).unwrap().is_none());
    }

    const PUT_SYMBOL: &str = "SPY260609P00450000";

    fn put_expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 9).unwrap()
    }

    /// Seed a DEPLOYED insurance record opened a week ago.
    fn seed_insurance(store: &MemorySleeveStore) {
        store
            .put(
                &key(),
                SleeveKind::Insurance,
                &OptionSleeveState {
                    status: SleeveStatus::Deployed,
                    opened_run_id: Some("run-1".to_string()),
                    opened_as_of: Some(now() - Duration::days(7)),
                    underlying: Some("SPY".to_string()),
                    strike: Some(dec!(450)),
                    expiry: Some(put_expiry()),
                    contracts: 4,
                    premium_usd: dec!(12224),
                    contract_symbol: Some(PUT_SYMBOL.to_string()),
                    unwind_requested_as_of: None,
                },
            )
            .unwrap();
    }

    fn held_put(mark: Decimal) -> OptionPosition {
        OptionPosition {
            symbol: PUT_SYMBOL.to_string(),
            underlying: "SPY".to_string(),
            right: OptionRight::Put,
            strike: dec!(450),
            expiry: put_expiry(),
            contracts: 4,
            mark_value_usd: mark,
            days_to_expiry: None,
        }
    }

    #[tokio::test]
    async fn test_regime_flip_rotates_overlays() {
        let store = Arc::new(MemorySleeveStore::new());
        seed_insurance(&store);

        let puts = vec![held_put(dec!(8000))];
        let plan = planner(store.clone()).run(&input(risk_on(), puts)).await.unwrap();
        assert!(plan.risk.approved, "{:?}", plan.risk.blocked_reasons);

        let insurance = plan.sleeve(SleeveKind::Insurance).unwrap();
        assert_eq!(insurance.next_state.status, SleeveStatus::Unwinding);
        assert_eq!(insurance.order.as_ref().unwrap().side, OrderSide::Sell);
        assert!(has_flag(&plan.flags, "ARBITRATOR_VETO"));

        let growth = plan.sleeve(SleeveKind::Growth).unwrap();
        assert_eq!(growth.next_state.status, SleeveStatus::Deployed);
        // 500 * 0.03 * 1.05 * 1.1 = 17.325 → 17.32; 15000 / 1732
        assert_eq!(growth.order.as_ref().unwrap().quantity(), dec!(8));

        // Held at cost, not at the 8000 mark
        assert_eq!(plan.reserve.used_insurance, dec!(12224));
        assert_eq!(plan.reserve.used_growth, dec!(13856));
        assert_eq!(
            plan.reserve.used_total,
            plan.reserve.used_insurance + plan.reserve.used_growth
        );
        assert_eq!(plan.reserve.remaining, dec!(3920));

        let stored = store.get(&key(), SleeveKind::Insurance).unwrap().unwrap();
        assert_eq!(stored.status, SleeveStatus::Unwinding);
    }

    #[tokio::test]
    async fn test_missing_put_resets_record_instead_of_selling() {
        let store = Arc::new(MemorySleeveStore::new());
        seed_insurance(&store);
        let planner = planner(store.clone());

        // Broker holds no put: nothing to sell, the record is stale
        let plan = planner.run(&input(risk_on(), vec![])).await.unwrap();
        assert!(plan.risk.approved, "{:?}", plan.risk.blocked_reasons);
        assert!(plan.orders.iter().all(|o| o.side == OrderSide::Buy));
        assert!(has_flag(&plan.flags, "DEPLOYED_POSITION_MISSING"));
        assert!(!has_flag(&plan.flags, "ARBITRATOR_VETO"));

        let insurance = plan.sleeve(SleeveKind::Insurance).unwrap();
        assert!(insurance.order.is_none());
        assert_eq!(insurance.next_state.status, SleeveStatus::Inactive);

        let growth = plan.sleeve(SleeveKind::Growth).unwrap();
        assert_eq!(growth.next_state.status, SleeveStatus::Deployed);
        assert_eq!(plan.reserve.used_insurance, Decimal::ZERO);

        let stored = store.get(&key(), SleeveKind::Insurance).unwrap().unwrap();
        assert_eq!(stored.status, SleeveStatus::Inactive);

        // Next cycle starts clean
        let again = planner.run(&input(risk_on(), vec![])).await.unwrap();
        assert!(again.risk.approved, "{:?}", again.risk.blocked_reasons);
        assert!(!has_flag(&again.flags, "DEPLOYED_POSITION_MISSING"));
    }

    #[tokio::test]
    async fn test_appreciated_put_keeps_reserve_at_cost() {
        let store = Arc::new(MemorySleeveStore::new());
        seed_insurance(&store);

        // Bought for 12224, now worth 40000 of a 30000 reserve
        let plan = planner(store.clone())
            .run(&input(risk_off(), vec![held_put(dec!(40000))]))
            .await
            .unwrap();

        let insurance = plan.sleeve(SleeveKind::Insurance).unwrap();
        assert_eq!(insurance.next_state.status, SleeveStatus::Deployed);
        assert!(has_flag(&plan.flags, "SLEEVE_HOLDING"));

        assert_eq!(plan.reserve.reserve_budget, dec!(30000));
        assert_eq!(plan.reserve.used_insurance, dec!(12224));
        assert_eq!(plan.reserve.used_growth, Decimal::ZERO);
        assert_eq!(plan.reserve.remaining, dec!(17776));
    }

    #[tokio::test]
    async fn test_sleeve_states_default_inactive() {
        let planner = planner(Arc::new(MemorySleeveStore::new()));
        let states = planner.sleeve_states().unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|(_, s)| s.status == SleeveStatus::Inactive));
    }

    #[test]
    fn test_invalid_proxy_map_rejected() {
        let mut config = Config::default();
        config
            .universe
            .proxy_parents
            .insert("SPY".to_string(), "SPY".to_string());
        assert!(CyclePlanner::new(config, Arc::new(MemorySleeveStore::new())).is_err());
    }

    #[test]
    fn test_cycle_input_parses_with_defaults() {
        let json = r#"{
            "run_id": "r1",
            "as_of": "2026-03-09T15:00:00Z",
            "portfolio": {"cash": "1000", "equity": "1000"},
            "prices": {"SPY": "500"},
            "regimes": {
                "equity": {"label": "neutral", "confidence": "0.5"},
                "vol": {"label": "normal", "confidence": "0.5"},
                "rates": {"label": "neutral", "stance": "neutral", "confidence": "0.5"}
            },
            "target_plan": {"weights": {"SPY": "1"}}
        }"#;
        let input: CycleInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.confidence_scale, Decimal::ONE);
        assert!(!input.dislocation.active);
        assert_eq!(input.risk_state.drawdown, Decimal::ZERO);
    }
}
