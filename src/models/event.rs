use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which adapter produced an event. Vendor-feed events are normalized into
/// the same key space as the native adapters so cross-source dedup falls
/// out of the key itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    EthPoll,
    PolygonPoll,
    SolanaWs,
    SolanaPoll,
    XrpWs,
    WhaleAlertWs,
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceId::EthPoll => write!(f, "eth_poll"),
            SourceId::PolygonPoll => write!(f, "polygon_poll"),
            SourceId::SolanaWs => write!(f, "solana_ws"),
            SourceId::SolanaPoll => write!(f, "solana_poll"),
            SourceId::XrpWs => write!(f, "xrp_ws"),
            SourceId::WhaleAlertWs => write!(f, "whale_alert_ws"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Buy,
    Sell,
    Transfer,
    Unknown,
}

impl Classification {
    pub fn is_directional(&self) -> bool {
        matches!(self, Classification::Buy | Classification::Sell)
    }

    pub fn flipped(&self) -> Classification {
        match self {
            Classification::Buy => Classification::Sell,
            Classification::Sell => Classification::Buy,
            other => *other,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Buy => write!(f, "BUY"),
            Classification::Sell => write!(f, "SELL"),
            Classification::Transfer => write!(f, "TRANSFER"),
            Classification::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Chain-specific composite identity used to recognize the same on-chain
/// movement arriving from multiple sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub chain: String,
    pub tx_hash: String,
    pub discriminant: u64,
}

/// Uniform event produced by every source adapter.
///
/// EVM addresses are lowercased at the adapter boundary; Solana and XRP
/// addresses keep their original case. `usd_value` may be left at 0 by an
/// adapter that has no price source, in which case the engine fills it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub source: SourceId,
    pub blockchain: String,
    pub tx_hash: String,
    #[serde(default)]
    pub log_index: u32,
    #[serde(default)]
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_ref: Option<u64>,
    pub from_addr: String,
    pub to_addr: String,
    pub symbol: String,
    pub amount: f64,
    pub usd_value: f64,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl RawEvent {
    /// Solana dedup intentionally collapses on the signature alone so a
    /// parsed report and a raw balance-delta report of the same transaction
    /// land on the same key.
    pub fn dedup_key(&self) -> DedupKey {
        let discriminant = match self.blockchain.as_str() {
            "solana" => 0,
            "xrp" => self.sequence,
            _ => self.log_index as u64,
        };
        DedupKey {
            chain: self.blockchain.clone(),
            tx_hash: self.tx_hash.clone(),
            discriminant,
        }
    }
}

/// Outcome of a single engine phase. `weight` is the phase prior used by
/// the master classifier.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub phase: PhaseId,
    pub classification: Classification,
    pub confidence: f64,
    pub weight: f64,
    pub evidence: String,
    pub whale_signals: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    CexClassification,
    DexProtocolClassification,
    StablecoinFlow,
    MarketMakerAdjustment,
    ChainHeuristic,
    WalletBehavior,
    AddressEnrichment,
    MegaWhaleHistory,
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseId::CexClassification => write!(f, "cex_classification"),
            PhaseId::DexProtocolClassification => write!(f, "dex_protocol_classification"),
            PhaseId::StablecoinFlow => write!(f, "stablecoin_flow"),
            PhaseId::MarketMakerAdjustment => write!(f, "market_maker_adjustment"),
            PhaseId::ChainHeuristic => write!(f, "chain_heuristic"),
            PhaseId::WalletBehavior => write!(f, "wallet_behavior"),
            PhaseId::AddressEnrichment => write!(f, "address_enrichment"),
            PhaseId::MegaWhaleHistory => write!(f, "mega_whale_history"),
        }
    }
}

/// A deduplicated event after the full classification pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    pub trace_id: Uuid,
    pub source: SourceId,
    pub blockchain: String,
    pub tx_hash: String,
    #[serde(default)]
    pub log_index: u32,
    #[serde(rename = "from")]
    pub from_addr: String,
    #[serde(rename = "to")]
    pub to_addr: String,
    pub symbol: String,
    pub amount: f64,
    pub usd_value: f64,
    pub timestamp: i64,
    pub classification: Classification,
    pub confidence: f64,
    pub whale_score: f64,
    pub is_whale: bool,
    pub whale_signals: Vec<String>,
    pub evidence: Vec<String>,
    pub phases_completed: u32,
    pub cost_optimized: bool,
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(chain: &str, hash: &str, log_index: u32, sequence: u64) -> RawEvent {
        RawEvent {
            source: SourceId::EthPoll,
            blockchain: chain.to_string(),
            tx_hash: hash.to_string(),
            log_index,
            sequence,
            block_ref: None,
            from_addr: "0xaaa".to_string(),
            to_addr: "0xbbb".to_string(),
            symbol: "WETH".to_string(),
            amount: 1.0,
            usd_value: 3000.0,
            timestamp: 1_700_000_000,
            raw: None,
        }
    }

    #[test]
    fn test_evm_key_includes_log_index() {
        let a = event("ethereum", "0xabc", 0, 0);
        let b = event("ethereum", "0xabc", 1, 0);
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_solana_key_ignores_log_index() {
        let a = event("solana", "5sig", 0, 0);
        let b = event("solana", "5sig", 3, 0);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_xrp_key_uses_sequence() {
        let a = event("xrp", "ABCD", 0, 7);
        let b = event("xrp", "ABCD", 0, 8);
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_classification_flip() {
        assert_eq!(Classification::Buy.flipped(), Classification::Sell);
        assert_eq!(Classification::Sell.flipped(), Classification::Buy);
        assert_eq!(Classification::Transfer.flipped(), Classification::Transfer);
    }

    #[test]
    fn test_classification_serializes_uppercase() {
        let json = serde_json::to_string(&Classification::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
    }
}
