//! Underlying and contract selection for the option sleeves.

use chrono::{Duration, Months, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::OptionCandidate;
use crate::config::{OptionsConfig, SleeveConfig};
use crate::model::{occ_symbol, OptionRight};
use crate::utils::{clamp, round_to_tick, safe_div};

/// Average days per month used for months-to-expiry filters.
const DAYS_PER_MONTH: Decimal = dec!(30.4375);

/// Why an underlying is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionsIntent {
    Hedge,
    Growth,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingSelection {
    pub symbol: Option<String>,
    /// Candidates checked, in order, up to and including the pick
    pub tried: Vec<String>,
}

/// First usable underlying for `intent`.
pub fn select_options_underlying(intent: OptionsIntent, config: &OptionsConfig) -> UnderlyingSelection {
    select_options_underlying_with(intent, config, |_| true)
}

/// Walk the intent's preference list (or the general list when it is empty)
/// and return the first entry that passes `usable`.
pub fn select_options_underlying_with<F>(
    intent: OptionsIntent,
    config: &OptionsConfig,
    mut usable: F,
) -> UnderlyingSelection
where
    F: FnMut(&str) -> bool,
{
    let preferred = match intent {
        OptionsIntent::Hedge => &config.hedge_preferred,
        OptionsIntent::Growth => &config.growth_preferred,
    };
    let list = if preferred.is_empty() {
        &config.underlyings
    } else {
        preferred
    };

    let mut selection = UnderlyingSelection::default();
    for symbol in list {
        selection.tried.push(symbol.clone());
        if usable(symbol) {
            selection.symbol = Some(symbol.clone());
            break;
        }
    }
    selection
}

/// Fractional months between two dates.
pub fn months_to_expiry(as_of: NaiveDate, expiry: NaiveDate) -> Decimal {
    Decimal::from((expiry - as_of).num_days()) / DAYS_PER_MONTH
}

/// Price a contract when no chain is available.
///
/// Strike is rounded to whole dollars; the premium is a rough
/// percentage-of-spot estimate marked up by the sleeve's buffer.
pub fn synthetic_candidate(
    underlying: &str,
    price: Decimal,
    as_of: NaiveDate,
    right: OptionRight,
    sleeve: &SleeveConfig,
) -> OptionCandidate {
    let moneyness = clamp(sleeve.target_moneyness, sleeve.min_moneyness, sleeve.max_moneyness);
    let strike = round_to_tick(price * moneyness, Decimal::ONE);

    let months = sleeve
        .target_months_to_expiry
        .clamp(sleeve.min_months_to_expiry, sleeve.max_months_to_expiry);
    let expiry = as_of
        .checked_add_months(Months::new(months))
        .unwrap_or_else(|| as_of + Duration::days(i64::from(months) * 30));

    let markup = Decimal::ONE + sleeve.premium_buffer;
    let premium = match right {
        OptionRight::Put => safe_div(price * dec!(0.05), moneyness) * markup,
        OptionRight::Call => price * dec!(0.03) * moneyness * markup,
    }
    .round_dp(2);

    OptionCandidate {
        symbol: occ_symbol(underlying, expiry, right, strike),
        underlying: underlying.to_string(),
        expiry,
        strike,
        premium,
        right,
    }
}

/// Pick the chain contract inside the sleeve's expiry and moneyness windows
/// whose strike is closest to spot.
pub fn pick_from_chain(
    candidates: &[OptionCandidate],
    price: Decimal,
    as_of: NaiveDate,
    right: OptionRight,
    sleeve: &SleeveConfig,
) -> Option<OptionCandidate> {
    let min_months = Decimal::from(sleeve.min_months_to_expiry);
    let max_months = Decimal::from(sleeve.max_months_to_expiry);

    candidates
        .iter()
        .filter(|c| c.right == right && c.premium > Decimal::ZERO)
        .filter(|c| {
            let months = months_to_expiry(as_of, c.expiry);
            months >= min_months && months <= max_months
        })
        .filter(|c| {
            let moneyness = safe_div(c.strike, price);
            moneyness >= sleeve.min_moneyness && moneyness <= sleeve.max_moneyness
        })
        .min_by_key(|c| (c.strike - price).abs())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(hedge: &[&str], underlyings: &[&str]) -> OptionsConfig {
        OptionsConfig {
            hedge_preferred: hedge.iter().map(|s| s.to_string()).collect(),
            underlyings: underlyings.iter().map(|s| s.to_string()).collect(),
            ..OptionsConfig::default()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_hedge_prefers_hedge_list() {
        let selection = select_options_underlying(OptionsIntent::Hedge, &options(&["QQQ"], &["QQQ", "IWM"]));
        assert_eq!(selection.symbol.as_deref(), Some("QQQ"));
        assert_eq!(selection.tried, vec!["QQQ".to_string()]);
    }

    #[test]
    fn test_growth_falls_back_to_general_list() {
        let selection = select_options_underlying(OptionsIntent::Growth, &options(&["QQQ"], &["SPY", "IWM"]));
        assert_eq!(selection.symbol.as_deref(), Some("SPY"));
    }

    #[test]
    fn test_predicate_skips_unusable() {
        let selection = select_options_underlying_with(
            OptionsIntent::Hedge,
            &options(&[], &["SPY", "QQQ", "IWM"]),
            |s| s == "IWM",
        );
        assert_eq!(selection.symbol.as_deref(), Some("IWM"));
        assert_eq!(selection.tried, vec!["SPY", "QQQ", "IWM"]);

        let none = select_options_underlying_with(OptionsIntent::Hedge, &options(&[], &["SPY"]), |_| false);
        assert!(none.symbol.is_none());
        assert_eq!(none.tried, vec!["SPY"]);
    }

    #[test]
    fn test_synthetic_put() {
        let config = OptionsConfig::default();
        let c = synthetic_candidate("QQQ", dec!(500), date(2026, 3, 6), OptionRight::Put, &config.insurance);
        // 500 * 0.90
        assert_eq!(c.strike, dec!(450));
        assert_eq!(c.expiry, date(2026, 6, 6));
        // 500 * 0.05 / 0.9 * 1.1 = 30.555...
        assert_eq!(c.premium, dec!(30.56));
        assert_eq!(c.symbol, "QQQ260606P00450000");
    }

    #[test]
    fn test_synthetic_call() {
        let config = OptionsConfig::default();
        let c = synthetic_candidate("SPY", dec!(600), date(2026, 3, 6), OptionRight::Call, &config.growth);
        assert_eq!(c.strike, dec!(630));
        assert_eq!(c.expiry, date(2026, 9, 6));
        // 600 * 0.03 * 1.05 * 1.1
        assert_eq!(c.premium, dec!(20.79));
    }

    #[test]
    fn test_chain_pick_filters_windows() {
        let config = OptionsConfig::default();
        let as_of = date(2026, 3, 6);
        let put = |strike: Decimal, expiry: NaiveDate| OptionCandidate {
            symbol: occ_symbol("QQQ", expiry, OptionRight::Put, strike),
            underlying: "QQQ".to_string(),
            expiry,
            strike,
            premium: dec!(9),
            right: OptionRight::Put,
        };
        let candidates = vec![
            // Too close to expiry
            put(dec!(470), date(2026, 3, 20)),
            // Too far out of the money (0.70)
            put(dec!(350), date(2026, 6, 19)),
            put(dec!(420), date(2026, 6, 19)),
            put(dec!(460), date(2026, 6, 19)),
        ];
        let pick = pick_from_chain(&candidates, dec!(500), as_of, OptionRight::Put, &config.insurance).unwrap();
        assert_eq!(pick.strike, dec!(460));

        assert!(pick_from_chain(&candidates, dec!(500), as_of, OptionRight::Call, &config.insurance).is_none());
    }
}
