//! Proxy / parent ETF lookup.
//!
//! A proxy is a cheaper share class that can stand in for its parent (e.g.
//! SPLG for SPY). The map comes from configuration so universes can change
//! without code edits.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};

/// Bidirectional proxy ↔ parent lookup.
#[derive(Debug, Clone, Default)]
pub struct ProxyMap {
    parent_of: HashMap<String, String>,
    proxy_for: HashMap<String, String>,
}

impl ProxyMap {
    /// Build from a proxy → parent table.
    ///
    /// Rejects self-maps, chains (a parent that is itself a proxy) and
    /// parents with more than one proxy.
    pub fn new(proxy_parents: &BTreeMap<String, String>) -> Result<Self> {
        let mut proxy_for = HashMap::new();

        for (proxy, parent) in proxy_parents {
            if proxy == parent {
                bail!("proxy map entry {proxy} maps to itself");
            }
            if proxy_parents.contains_key(parent) {
                bail!("proxy map chains {proxy} -> {parent} -> {}", proxy_parents[parent]);
            }
            if let Some(existing) = proxy_for.insert(parent.clone(), proxy.clone()) {
                bail!("parent {parent} has two proxies: {existing} and {proxy}");
            }
        }

        Ok(Self {
            parent_of: proxy_parents
                .iter()
                .map(|(proxy, parent)| (proxy.clone(), parent.clone()))
                .collect(),
            proxy_for,
        })
    }

    pub fn parent_of(&self, proxy: &str) -> Option<&str> {
        self.parent_of.get(proxy).map(String::as_str)
    }

    pub fn proxy_for(&self, parent: &str) -> Option<&str> {
        self.proxy_for.get(parent).map(String::as_str)
    }

    /// Parent symbol for a proxy, otherwise the symbol itself.
    pub fn canonical<'a>(&'a self, symbol: &'a str) -> &'a str {
        self.parent_of(symbol).unwrap_or(symbol)
    }
}
