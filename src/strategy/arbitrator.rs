//! Regime arbitration between the insurance and growth overlays.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OptionsConfig;
use crate::model::{EquityRegimeLabel, RegimeContext, VolRegimeLabel};

/// Gates applied on top of the regime labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArbitrationConfig {
    /// Optional equity-confidence floor for the growth overlay
    pub growth_min_confidence: Option<Decimal>,
}

impl From<&OptionsConfig> for ArbitrationConfig {
    fn from(config: &OptionsConfig) -> Self {
        Self {
            growth_min_confidence: config.growth_min_confidence,
        }
    }
}

/// Which overlays may be active this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleevePermissions {
    pub growth_convexity: bool,
    pub insurance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleeveArbitrationResult {
    pub allowed: SleevePermissions,
    pub reasons: Vec<String>,
}

/// Decide which option overlay may be active.
///
/// Insurance wins whenever a dislocation is active or equities are risk-off;
/// growth additionally requires insurance to be off, so both can never be
/// allowed together whatever labels are added later.
pub fn arbitrate_sleeves(
    dislocation_active: bool,
    regimes: &RegimeContext,
    config: &ArbitrationConfig,
) -> SleeveArbitrationResult {
    let mut reasons = Vec::new();
    let equity = regimes.equity.label;

    let insurance = dislocation_active || equity == EquityRegimeLabel::RiskOff;
    if dislocation_active {
        reasons.push("dislocation active: insurance allowed".to_string());
    }
    if equity == EquityRegimeLabel::RiskOff {
        reasons.push("equity regime risk_off: insurance allowed".to_string());
    }

    let confident = config
        .growth_min_confidence
        .map_or(true, |floor| regimes.equity.confidence >= floor);
    let growth_regime = !dislocation_active
        && equity == EquityRegimeLabel::RiskOn
        && regimes.vol.label == VolRegimeLabel::Low;

    if growth_regime && !confident {
        reasons.push(format!(
            "growth regime but equity confidence {} below floor",
            regimes.equity.confidence
        ));
    }

    let growth_convexity = growth_regime && confident && !insurance;
    if growth_convexity {
        reasons.push("risk_on with low vol: growth convexity allowed".to_string());
    }

    debug_assert!(
        !(growth_convexity && insurance),
        "arbitrator allowed both overlays"
    );

    debug!(
        dislocation_active,
        equity = ?equity,
        vol = ?regimes.vol.label,
        insurance,
        growth_convexity,
        "Sleeve arbitration"
    );

    SleeveArbitrationResult {
        allowed: SleevePermissions {
            growth_convexity,
            insurance,
        },
        reasons,
    }
}
