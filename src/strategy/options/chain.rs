//! Option chain data.
//!
//! Chains are optional: when no provider is configured the sleeves price a
//! synthetic contract instead (see [`super::synthetic_candidate`]).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::model::OptionRight;

/// A listed (or synthetic) option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionCandidate {
    /// Contract symbol (OCC style)
    pub symbol: String,
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    /// Premium per share; per-contract cost is `premium * multiplier`
    pub premium: Decimal,
    pub right: OptionRight,
}

/// Source of option chain candidates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Put contracts on `symbol` quoted as of `as_of`.
    async fn put_candidates(&self, symbol: &str, as_of: NaiveDate) -> Result<Vec<OptionCandidate>>;

    /// Call contracts on `symbol` quoted as of `as_of`.
    async fn call_candidates(&self, symbol: &str, as_of: NaiveDate)
        -> Result<Vec<OptionCandidate>>;
}

/// Fixed chain snapshot, e.g. loaded from a JSON export.
#[derive(Debug, Clone, Default)]
pub struct StaticChain {
    candidates: Vec<OptionCandidate>,
}

impl StaticChain {
    pub fn new(candidates: Vec<OptionCandidate>) -> Self {
        Self { candidates }
    }

    /// Load a JSON array of candidates.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chain file {}", path.display()))?;
        let candidates: Vec<OptionCandidate> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse chain file {}", path.display()))?;
        debug!(count = candidates.len(), path = %path.display(), "Loaded static chain");
        Ok(Self { candidates })
    }

    fn matching(&self, symbol: &str, right: OptionRight) -> Vec<OptionCandidate> {
        self.candidates
            .iter()
            .filter(|c| c.underlying == symbol && c.right == right)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChainDataProvider for StaticChain {
    async fn put_candidates(&self, symbol: &str, _as_of: NaiveDate) -> Result<Vec<OptionCandidate>> {
        Ok(self.matching(symbol, OptionRight::Put))
    }

    async fn call_candidates(
        &self,
        symbol: &str,
        _as_of: NaiveDate,
    ) -> Result<Vec<OptionCandidate>> {
        Ok(self.matching(symbol, OptionRight::Call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate(underlying: &str, right: OptionRight) -> OptionCandidate {
        OptionCandidate {
            symbol: format!("{}-{:?}", underlying, right),
            underlying: underlying.to_string(),
            expiry: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            strike: dec!(450),
            premium: dec!(8.5),
            right,
        }
    }

    #[tokio::test]
    async fn test_static_chain_filters_by_right_and_underlying() {
        let chain = StaticChain::new(vec![
            candidate("QQQ", OptionRight::Put),
            candidate("QQQ", OptionRight::Call),
            candidate("SPY", OptionRight::Put),
        ]);
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();

        let puts = chain.put_candidates("QQQ", as_of).await.unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].right, OptionRight::Put);

        let calls = chain.call_candidates("SPY", as_of).await.unwrap();
        assert!(calls.is_empty());
    }

    #[test]
    fn test_static_chain_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.json");
        let json = serde_json::to_string(&vec![candidate("IWM", OptionRight::Call)]).unwrap();
        std::fs::write(&path, json).unwrap();

        let chain = StaticChain::from_file(&path).unwrap();
        assert_eq!(chain.matching("IWM", OptionRight::Call).len(), 1);
        assert!(StaticChain::from_file(dir.path().join("missing.json")).is_err());
    }
}
