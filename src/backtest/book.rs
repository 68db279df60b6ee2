//! Simulated brokerage account.
//!
//! Fills every approved order at its reference price. Option marks decay a
//! fixed fraction per week and expire worthless; no intrinsic value is
//! modelled.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use crate::model::{
    Holding, OptionAction, OptionPosition, OrderSide, PortfolioState, QuoteMap, TradeOrder,
};

#[derive(Debug, Clone)]
struct SimOption {
    position: OptionPosition,
    mark_per_share: Decimal,
}

/// Cash, ETF holdings and option positions of the simulated account.
#[derive(Debug, Clone)]
pub struct SimulatedBook {
    cash: Decimal,
    holdings: BTreeMap<String, Holding>,
    options: BTreeMap<String, SimOption>,
    multiplier: Decimal,
    weekly_decay: Decimal,
    premium_spent: Decimal,
}

impl SimulatedBook {
    pub fn new(cash: Decimal, multiplier: Decimal, weekly_decay: Decimal) -> Self {
        Self {
            cash,
            holdings: BTreeMap::new(),
            options: BTreeMap::new(),
            multiplier,
            weekly_decay,
            premium_spent: Decimal::ZERO,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Total premium paid for option opens.
    pub fn premium_spent(&self) -> Decimal {
        self.premium_spent
    }

    /// Decay marks and drop contracts that expired before `as_of`.
    pub fn advance(&mut self, as_of: DateTime<Utc>) {
        let today = as_of.date_naive();
        self.options.retain(|symbol, option| {
            let live = option.position.expiry >= today;
            if !live {
                debug!(%symbol, "Option expired worthless");
            }
            live
        });

        let keep = Decimal::ONE - self.weekly_decay;
        for option in self.options.values_mut() {
            option.mark_per_share = (option.mark_per_share * keep).round_dp(4);
            option.position.mark_value_usd =
                Decimal::from(option.position.contracts) * option.mark_per_share * self.multiplier;
        }
    }

    /// Snapshot for the planner.
    pub fn snapshot(&self, prices: &QuoteMap) -> PortfolioState {
        let holdings: Vec<Holding> = self.holdings.values().cloned().collect();
        let option_positions: Vec<OptionPosition> =
            self.options.values().map(|o| o.position.clone()).collect();

        let etf_value: Decimal = holdings
            .iter()
            .map(|h| h.quantity * prices.get(&h.symbol).copied().unwrap_or(h.avg_price))
            .sum();
        let option_value: Decimal = option_positions.iter().map(|p| p.mark_value_usd).sum();

        PortfolioState {
            cash: self.cash,
            equity: self.cash + etf_value + option_value,
            holdings,
            option_positions,
        }
    }

    /// Fill an order at its reference price.
    pub fn fill(&mut self, order: &TradeOrder, as_of: DateTime<Utc>) {
        let qty = order.quantity();
        let notional = order.notional_usd();

        match (&order.option, order.side) {
            (Some(leg), OrderSide::Buy) if leg.action == OptionAction::BuyToOpen => {
                self.cash -= notional;
                self.premium_spent += notional;
                let contracts = qty.trunc().to_u32().unwrap_or(0);
                self.options.insert(
                    order.symbol.clone(),
                    SimOption {
                        position: OptionPosition {
                            symbol: order.symbol.clone(),
                            underlying: leg.underlying.clone(),
                            right: leg.right,
                            strike: leg.strike,
                            expiry: leg.expiry,
                            contracts,
                            mark_value_usd: notional,
                            days_to_expiry: None,
                        },
                        mark_per_share: order.reference_price,
                    },
                );
            }
            (Some(_), _) => {
                if self.options.remove(&order.symbol).is_some() {
                    self.cash += notional;
                }
            }
            (None, OrderSide::Buy) => {
                self.cash -= notional;
                let holding = self
                    .holdings
                    .entry(order.symbol.clone())
                    .or_insert_with(|| Holding {
                        symbol: order.symbol.clone(),
                        quantity: Decimal::ZERO,
                        avg_price: order.reference_price,
                        hold_since: as_of,
                    });
                let cost = holding.quantity * holding.avg_price + notional;
                holding.quantity += qty;
                holding.avg_price = cost / holding.quantity;
            }
            (None, OrderSide::Sell) => {
                let Some(holding) = self.holdings.get_mut(&order.symbol) else {
                    return;
                };
                let sold = qty.min(holding.quantity);
                self.cash += sold * order.reference_price;
                holding.quantity -= sold;
                if holding.quantity <= Decimal::ZERO {
                    self.holdings.remove(&order.symbol);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OptionLeg, OptionRight, SleeveTag};
    use chrono::{Duration, NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
    }

    fn put_order(side: OrderSide, action: OptionAction, premium: Decimal) -> TradeOrder {
        TradeOrder::option(
            "SPY260605P00450000",
            side,
            2,
            premium,
            OptionLeg {
                underlying: "SPY".to_string(),
                right: OptionRight::Put,
                strike: dec!(450),
                expiry: NaiveDate::from_ymd_opt(2026, 6, 5).unwrap(),
                multiplier: dec!(100),
                action,
            },
            SleeveTag::Insurance,
        )
    }

    #[test]
    fn test_etf_fills() {
        let mut book = SimulatedBook::new(dec!(10000), dec!(100), dec!(0.05));
        book.fill(&TradeOrder::shares("SPY", OrderSide::Buy, dec!(10), dec!(500)), now());
        assert_eq!(book.cash(), dec!(5000));

        book.fill(&TradeOrder::shares("SPY", OrderSide::Sell, dec!(4), dec!(510)), now());
        let prices: QuoteMap = [("SPY".to_string(), dec!(510))].into_iter().collect();
        let snapshot = book.snapshot(&prices);
        assert_eq!(snapshot.cash, dec!(7040));
        assert_eq!(snapshot.holdings[0].quantity, dec!(6));
        assert_eq!(snapshot.equity, dec!(7040) + dec!(3060));
    }

    #[test]
    fn test_option_lifecycle() {
        let mut book = SimulatedBook::new(dec!(10000), dec!(100), dec!(0.10));
        book.fill(&put_order(OrderSide::Buy, OptionAction::BuyToOpen, dec!(10)), now());
        assert_eq!(book.cash(), dec!(8000));
        assert_eq!(book.premium_spent(), dec!(2000));

        book.advance(now() + Duration::days(7));
        let snapshot = book.snapshot(&QuoteMap::new());
        assert_eq!(snapshot.option_positions[0].mark_value_usd, dec!(1800));
        assert_eq!(snapshot.equity, dec!(9800));

        book.fill(&put_order(OrderSide::Sell, OptionAction::SellToClose, dec!(9)), now());
        assert_eq!(book.cash(), dec!(9800));
        assert!(book.snapshot(&QuoteMap::new()).option_positions.is_empty());
    }

    #[test]
    fn test_options_expire() {
        let mut book = SimulatedBook::new(dec!(10000), dec!(100), dec!(0.05));
        book.fill(&put_order(OrderSide::Buy, OptionAction::BuyToOpen, dec!(10)), now());
        book.advance(Utc.with_ymd_and_hms(2026, 6, 8, 15, 0, 0).unwrap());
        assert!(book.snapshot(&QuoteMap::new()).option_positions.is_empty());
        assert_eq!(book.cash(), dec!(8000));
    }
}
