//! Option sleeve lifecycle: INACTIVE → DEPLOYED → UNWINDING → INACTIVE.
//!
//! One planner instance drives one sleeve (insurance puts or growth calls).
//! Each run reconciles pending unwinds against broker positions, then applies
//! the arbitrator veto, the near-expiry rule, and finally sizes a new
//! position from the reserve pool.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    pick_from_chain, select_options_underlying, synthetic_candidate, ChainDataProvider,
    OptionCandidate, OptionsIntent,
};
use crate::config::{OptionsConfig, SleeveConfig};
use crate::model::{
    Flag, FlagDetail, OptionAction, OptionLeg, OptionPosition, OptionRight, OrderSide,
    PortfolioState, QuoteMap, SleeveTag, TradeOrder,
};
use crate::utils::{round_down_to_lot, safe_div};

/// The two option overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleeveKind {
    /// Protective puts
    Insurance,
    /// Convex upside calls
    Growth,
}

impl SleeveKind {
    pub const ALL: [SleeveKind; 2] = [SleeveKind::Insurance, SleeveKind::Growth];

    pub fn tag(&self) -> SleeveTag {
        match self {
            SleeveKind::Insurance => SleeveTag::Insurance,
            SleeveKind::Growth => SleeveTag::Growth,
        }
    }

    pub fn right(&self) -> OptionRight {
        match self {
            SleeveKind::Insurance => OptionRight::Put,
            SleeveKind::Growth => OptionRight::Call,
        }
    }

    pub fn intent(&self) -> OptionsIntent {
        match self {
            SleeveKind::Insurance => OptionsIntent::Hedge,
            SleeveKind::Growth => OptionsIntent::Growth,
        }
    }

    pub fn config<'a>(&self, options: &'a OptionsConfig) -> &'a SleeveConfig {
        match self {
            SleeveKind::Insurance => &options.insurance,
            SleeveKind::Growth => &options.growth,
        }
    }
}

impl fmt::Display for SleeveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SleeveStatus {
    #[default]
    Inactive,
    Deployed,
    Unwinding,
}

/// Durable per-sleeve record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionSleeveState {
    pub status: SleeveStatus,
    #[serde(default)]
    pub opened_run_id: Option<String>,
    #[serde(default)]
    pub opened_as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default)]
    pub strike: Option<Decimal>,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub contracts: u32,
    /// Total premium paid at open
    #[serde(default)]
    pub premium_usd: Decimal,
    #[serde(default)]
    pub contract_symbol: Option<String>,
    #[serde(default)]
    pub unwind_requested_as_of: Option<DateTime<Utc>>,
}

impl OptionSleeveState {
    pub fn is_deployed(&self) -> bool {
        self.status == SleeveStatus::Deployed
    }

    /// Premium still tied up by this record (zero once INACTIVE).
    pub fn cost_basis(&self) -> Decimal {
        match self.status {
            SleeveStatus::Inactive => Decimal::ZERO,
            SleeveStatus::Deployed | SleeveStatus::Unwinding => self.premium_usd,
        }
    }

    /// True when the position was opened on the same UTC day as `as_of`.
    pub fn opened_same_day(&self, as_of: DateTime<Utc>) -> bool {
        self.opened_as_of
            .is_some_and(|opened| opened.date_naive() == as_of.date_naive())
    }

    /// True when every field needed to close the tracked contract is set.
    pub fn has_contract(&self) -> bool {
        self.contract_symbol.is_some()
            && self.underlying.is_some()
            && self.strike.is_some()
            && self.expiry.is_some()
    }

    /// Leg describing the tracked contract, if the record is complete.
    fn leg(&self, right: OptionRight, multiplier: Decimal, action: OptionAction) -> Option<OptionLeg> {
        Some(OptionLeg {
            underlying: self.underlying.clone()?,
            right,
            strike: self.strike?,
            expiry: self.expiry?,
            multiplier,
            action,
        })
    }
}

/// Per-run inputs for one sleeve.
#[derive(Debug, Clone)]
pub struct SleeveContext<'a> {
    pub run_id: &'a str,
    pub as_of: DateTime<Utc>,
    /// Arbitrator permission for this sleeve
    pub allowed: bool,
    pub portfolio: &'a PortfolioState,
    pub prices: &'a QuoteMap,
    pub reserve_budget: Decimal,
    /// Premium already committed this run by other sleeves
    pub reserve_committed: Decimal,
    /// Cost basis of other sleeves' open records, this run's commits included
    pub reserve_in_use: Decimal,
    /// Cash this sleeve may spend
    pub cash_available: Decimal,
}

/// What one sleeve wants to do this run.
#[derive(Debug, Clone, Serialize)]
pub struct SleevePlan {
    pub sleeve: SleeveKind,
    pub prior_status: SleeveStatus,
    pub order: Option<TradeOrder>,
    pub next_state: OptionSleeveState,
    pub flags: Vec<Flag>,
    /// Premium of a new open this run (zero otherwise)
    pub premium_committed: Decimal,
}

/// Plans one option sleeve.
pub struct OptionSleevePlanner {
    kind: SleeveKind,
    options: OptionsConfig,
    chain: Option<Arc<dyn ChainDataProvider>>,
}

impl OptionSleevePlanner {
    pub fn new(
        kind: SleeveKind,
        options: OptionsConfig,
        chain: Option<Arc<dyn ChainDataProvider>>,
    ) -> Self {
        Self {
            kind,
            options,
            chain,
        }
    }

    pub fn kind(&self) -> SleeveKind {
        self.kind
    }

    fn sleeve_config(&self) -> &SleeveConfig {
        self.kind.config(&self.options)
    }

    fn tag(&self) -> SleeveTag {
        self.kind.tag()
    }

    /// Evaluate the state machine for one run.
    pub async fn plan(&self, state: OptionSleeveState, ctx: &SleeveContext<'_>) -> SleevePlan {
        let mut plan = SleevePlan {
            sleeve: self.kind,
            prior_status: state.status,
            order: None,
            next_state: state,
            flags: Vec::new(),
            premium_committed: Decimal::ZERO,
        };

        if !self.reconcile(&mut plan, ctx) {
            return plan;
        }

        let allowed = ctx.allowed && self.options.enabled && self.sleeve_config().enabled;
        if !allowed {
            self.apply_veto(&mut plan, ctx);
            return plan;
        }

        if plan.next_state.is_deployed() {
            self.manage_deployed(&mut plan, ctx);
            return plan;
        }

        self.open(&mut plan, ctx).await;
        plan
    }

    fn broker_position<'a>(
        &self,
        state: &OptionSleeveState,
        portfolio: &'a PortfolioState,
    ) -> Option<&'a OptionPosition> {
        state
            .contract_symbol
            .as_deref()
            .and_then(|symbol| portfolio.option_position(symbol))
    }

    /// Settle UNWINDING and DEPLOYED records against broker positions.
    /// Returns false when evaluation should stop here.
    fn reconcile(&self, plan: &mut SleevePlan, ctx: &SleeveContext<'_>) -> bool {
        let state = &plan.next_state;
        let status = state.status;
        let held = self.broker_position(state, ctx.portfolio).is_some();
        let expired = state.expiry.is_some_and(|e| e < ctx.as_of.date_naive());
        let complete = state.has_contract();
        let contract_symbol = state.contract_symbol.clone().unwrap_or_default();

        match status {
            SleeveStatus::Unwinding if held => {
                plan.flags.push(Flag::new(FlagDetail::UnwindPending {
                    sleeve: self.tag(),
                    contract_symbol,
                }));
                false
            }
            SleeveStatus::Unwinding => {
                info!(sleeve = %self.kind, %contract_symbol, "Unwind confirmed, sleeve reset");
                plan.flags.push(Flag::new(FlagDetail::SleeveReconciled {
                    sleeve: self.tag(),
                    contract_symbol,
                }));
                plan.next_state = OptionSleeveState::default();
                true
            }
            SleeveStatus::Deployed if !held && expired => {
                info!(sleeve = %self.kind, %contract_symbol, "Contract expired, sleeve reset");
                plan.flags.push(Flag::new(FlagDetail::SleeveReconciled {
                    sleeve: self.tag(),
                    contract_symbol,
                }));
                plan.next_state = OptionSleeveState::default();
                true
            }
            SleeveStatus::Deployed if !complete => {
                warn!(sleeve = %self.kind, "Deployed record is missing contract details, resetting");
                plan.next_state = OptionSleeveState::default();
                true
            }
            // Open fill still pending on the open day
            SleeveStatus::Deployed if !held && !state.opened_same_day(ctx.as_of) => {
                warn!(sleeve = %self.kind, %contract_symbol, "Deployed contract not held, sleeve reset");
                plan.flags.push(Flag::new(FlagDetail::DeployedPositionMissing {
                    sleeve: self.tag(),
                    contract_symbol,
                }));
                plan.next_state = OptionSleeveState::default();
                true
            }
            _ => true,
        }
    }

    fn apply_veto(&self, plan: &mut SleevePlan, ctx: &SleeveContext<'_>) {
        if !plan.next_state.is_deployed() {
            plan.flags.push(Flag::new(FlagDetail::SleeveNotAllowed { sleeve: self.tag() }));
            return;
        }

        if plan.next_state.opened_same_day(ctx.as_of) {
            plan.flags
                .push(Flag::new(FlagDetail::CloseDeferredSameDay { sleeve: self.tag() }));
            return;
        }

        let contract_symbol = plan.next_state.contract_symbol.clone().unwrap_or_default();
        plan.flags.push(Flag::new(FlagDetail::ArbitratorVeto {
            sleeve: self.tag(),
            contract_symbol,
        }));
        self.close(plan, ctx, "arbitrator no longer allows this overlay");
    }

    fn manage_deployed(&self, plan: &mut SleevePlan, ctx: &SleeveContext<'_>) {
        let state = &plan.next_state;
        let dte = self
            .broker_position(state, ctx.portfolio)
            .and_then(|p| p.days_to_expiry)
            .or_else(|| state.expiry.map(|e| (e - ctx.as_of.date_naive()).num_days()))
            .unwrap_or_default();

        let sleeve = self.sleeve_config();
        if dte <= sleeve.close_within_days && !state.opened_same_day(ctx.as_of) {
            if sleeve.allow_expire {
                plan.flags.push(Flag::new(FlagDetail::NearExpiryAllowExpire {
                    sleeve: self.tag(),
                    days_to_expiry: dte,
                }));
            } else {
                plan.flags.push(Flag::new(FlagDetail::NearExpiryClose {
                    sleeve: self.tag(),
                    days_to_expiry: dte,
                }));
                self.close(plan, ctx, format!("{} days to expiry", dte));
            }
            return;
        }

        plan.flags.push(Flag::new(FlagDetail::SleeveHolding {
            sleeve: self.tag(),
            days_to_expiry: dte,
        }));
    }

    /// Emit a sell-to-close for the tracked contract and move to UNWINDING.
    fn close(&self, plan: &mut SleevePlan, ctx: &SleeveContext<'_>, reason: impl Into<String>) {
        let multiplier = self.options.contract_multiplier;
        let state = &plan.next_state;
        let Some(leg) = state.leg(self.kind.right(), multiplier, OptionAction::SellToClose) else {
            return;
        };
        let Some(symbol) = state.contract_symbol.clone() else {
            return;
        };

        // Never sell what the account does not hold
        let Some(position) = self.broker_position(state, ctx.portfolio) else {
            warn!(sleeve = %self.kind, %symbol, "Close skipped, contract not held");
            return;
        };
        let contracts = position.contracts;
        let entry_per_share = safe_div(
            state.premium_usd,
            Decimal::from(state.contracts) * multiplier,
        );
        let reference = position
            .mark_per_share(multiplier)
            .unwrap_or(entry_per_share);

        info!(
            sleeve = %self.kind,
            %symbol,
            contracts,
            %reference,
            "Closing option sleeve"
        );

        plan.order = Some(
            TradeOrder::option(symbol, OrderSide::Sell, contracts, reference, leg, self.tag())
                .with_thesis(reason, "overlay re-allowed by arbitrator"),
        );
        plan.next_state.status = SleeveStatus::Unwinding;
        plan.next_state.unwind_requested_as_of = Some(ctx.as_of);
    }

    async fn candidate(
        &self,
        underlying: &str,
        price: Decimal,
        as_of: NaiveDate,
        flags: &mut Vec<Flag>,
    ) -> Option<OptionCandidate> {
        let right = self.kind.right();
        let sleeve = self.sleeve_config();

        let Some(chain) = &self.chain else {
            return Some(synthetic_candidate(underlying, price, as_of, right, sleeve));
        };

        let fetched = match right {
            OptionRight::Put => chain.put_candidates(underlying, as_of).await,
            OptionRight::Call => chain.call_candidates(underlying, as_of).await,
        };

        let picked = match fetched {
            Ok(candidates) => {
                debug!(sleeve = %self.kind, underlying, count = candidates.len(), "Fetched chain");
                pick_from_chain(&candidates, price, as_of, right, sleeve)
            }
            Err(e) => {
                warn!(sleeve = %self.kind, underlying, error = %e, "Chain fetch failed");
                flags.push(Flag::new(FlagDetail::ChainFetchFailed {
                    sleeve: self.tag(),
                    underlying: underlying.to_string(),
                    error: e.to_string(),
                }));
                None
            }
        };

        if picked.is_none() {
            flags.push(Flag::new(FlagDetail::NoContractAvailable {
                sleeve: self.tag(),
                underlying: underlying.to_string(),
            }));
        }
        picked
    }

    /// USD this sleeve may spend on a new position.
    pub fn available_budget(&self, ctx: &SleeveContext<'_>) -> Decimal {
        let same_right = ctx.portfolio.option_mark_value(self.kind.right());
        let all_rights = ctx.portfolio.total_option_mark_value();

        let sleeve_room = ctx.reserve_budget * self.sleeve_config().spend_pct - same_right;
        // Reserve is held at the larger of live marks and cost basis
        let held = (all_rights + ctx.reserve_committed).max(ctx.reserve_in_use);
        let reserve_room = ctx.reserve_budget - held;
        sleeve_room.min(reserve_room).max(Decimal::ZERO)
    }

    async fn open(&self, plan: &mut SleevePlan, ctx: &SleeveContext<'_>) {
        let selection = select_options_underlying(self.kind.intent(), &self.options);
        let Some(underlying) = selection.symbol else {
            plan.flags.push(Flag::new(FlagDetail::NoUnderlyingAvailable {
                sleeve: self.tag(),
                tried: selection.tried,
            }));
            return;
        };
        let Some(price) = ctx.prices.get(&underlying).copied() else {
            plan.flags.push(Flag::new(FlagDetail::MissingPrice { symbol: underlying }));
            return;
        };

        let as_of = ctx.as_of.date_naive();
        let Some(candidate) = self.candidate(&underlying, price, as_of, &mut plan.flags).await
        else {
            return;
        };

        let multiplier = self.options.contract_multiplier;
        let per_contract = candidate.premium * multiplier;
        let available = self.available_budget(ctx);
        let spendable = available.min(ctx.cash_available.max(Decimal::ZERO));
        let contracts = round_down_to_lot(safe_div(spendable, per_contract), Decimal::ONE);

        let contracts = match contracts.to_u32() {
            Some(n) if n >= 1 && per_contract > Decimal::ZERO => n,
            _ => {
                plan.flags.push(Flag::new(FlagDetail::BudgetInsufficient {
                    sleeve: self.tag(),
                    available_usd: spendable,
                    premium_per_contract: per_contract,
                }));
                return;
            }
        };

        let premium_usd = Decimal::from(contracts) * per_contract;
        let leg = OptionLeg {
            underlying: underlying.clone(),
            right: candidate.right,
            strike: candidate.strike,
            expiry: candidate.expiry,
            multiplier,
            action: OptionAction::BuyToOpen,
        };

        info!(
            sleeve = %self.kind,
            symbol = %candidate.symbol,
            contracts,
            %premium_usd,
            %available,
            "Opening option sleeve"
        );

        plan.flags.push(Flag::new(FlagDetail::SleeveOpened {
            sleeve: self.tag(),
            contract_symbol: candidate.symbol.clone(),
            contracts,
            premium_usd,
        }));

        let (thesis, invalidation) = match self.kind {
            SleeveKind::Insurance => (
                format!("{} put hedge while risk is elevated", underlying),
                "dislocation clears and equity regime leaves risk_off",
            ),
            SleeveKind::Growth => (
                format!("{} call convexity in risk_on / low vol", underlying),
                "equity regime leaves risk_on or vol rises",
            ),
        };

        plan.order = Some(
            TradeOrder::option(
                candidate.symbol.clone(),
                OrderSide::Buy,
                contracts,
                candidate.premium,
                leg,
                self.tag(),
            )
            .with_thesis(thesis, invalidation),
        );
        plan.premium_committed = premium_usd;
        plan.next_state = OptionSleeveState {
            status: SleeveStatus::Deployed,
            opened_run_id: Some(ctx.run_id.to_string()),
            opened_as_of: Some(ctx.as_of),
            underlying: Some(underlying),
            strike: Some(candidate.strike),
            expiry: Some(candidate.expiry),
            contracts,
            premium_usd,
            contract_symbol: Some(candidate.symbol),
            unwind_requested_as_of: None,
        };
    }
}
