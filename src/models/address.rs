use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AddressCategory {
    Cex,
    DexRouter,
    DexFactory,
    LendingPool,
    StakingContract,
    Bridge,
    MarketMaker,
    MixerSanctioned,
    Whale,
    ContractUnknown,
    EoaUnknown,
}

impl AddressCategory {
    /// Categories that count as verified protocol contracts for the
    /// directional logic in the DEX/protocol phase.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            AddressCategory::DexRouter
                | AddressCategory::DexFactory
                | AddressCategory::LendingPool
                | AddressCategory::StakingContract
                | AddressCategory::Bridge
        )
    }
}

/// Read-only address-intelligence record. Populated out-of-band by the
/// offline discovery jobs; the pipeline only ever reads snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    pub blockchain: String,
    pub category: AddressCategory,
    #[serde(default)]
    pub entity_name: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_usd: Option<f64>,
    #[serde(default)]
    pub tags: HashSet<String>,
}

impl AddressRecord {
    pub fn new(
        address: impl Into<String>,
        blockchain: impl Into<String>,
        category: AddressCategory,
        entity_name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            address: address.into(),
            blockchain: blockchain.into(),
            category,
            entity_name: entity_name.into(),
            confidence,
            balance_usd: None,
            tags: HashSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_balance(mut self, balance_usd: f64) -> Self {
        self.balance_usd = Some(balance_usd);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// A weak tag alone is not enough: a protocol classification needs the
    /// category plus at least one corroborating signal.
    pub fn is_verified_protocol(&self) -> bool {
        if !self.category.is_protocol() {
            return false;
        }
        !self.entity_name.is_empty()
            || self.confidence >= 0.75
            || self
                .tags
                .iter()
                .any(|t| matches!(t.as_str(), "dex" | "lending" | "staking" | "bridge" | "defi"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_categories() {
        assert!(AddressCategory::DexRouter.is_protocol());
        assert!(AddressCategory::Bridge.is_protocol());
        assert!(!AddressCategory::Cex.is_protocol());
        assert!(!AddressCategory::EoaUnknown.is_protocol());
    }

    #[test]
    fn test_verified_protocol_needs_corroboration() {
        let bare = AddressRecord {
            address: "0x1".to_string(),
            blockchain: "ethereum".to_string(),
            category: AddressCategory::DexRouter,
            entity_name: String::new(),
            confidence: 0.4,
            balance_usd: None,
            tags: HashSet::new(),
        };
        assert!(!bare.is_verified_protocol());

        let named = AddressRecord::new("0x2", "ethereum", AddressCategory::DexRouter, "Uniswap V3 Router", 0.9);
        assert!(named.is_verified_protocol());

        let tagged = bare.clone().with_tag("dex");
        assert!(tagged.is_verified_protocol());
    }
}
