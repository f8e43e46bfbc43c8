//! Individual analysis phases. Each phase inspects the event plus the AIS
//! records of its counterparties and either produces a `PhaseResult` or
//! stays silent. Phases never fail the event; errors are reported upward
//! and recorded as skipped.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::PhaseWeights;
use crate::models::{
    AddressCategory, AddressRecord, Classification, PhaseId, PhaseResult, RawEvent,
};

pub struct PhaseContext<'a> {
    pub event: &'a RawEvent,
    pub from: Option<&'a AddressRecord>,
    pub to: Option<&'a AddressRecord>,
    pub weights: &'a PhaseWeights,
    pub stablecoins: &'a std::collections::HashSet<String>,
}

impl<'a> PhaseContext<'a> {
    fn category(record: Option<&AddressRecord>) -> Option<AddressCategory> {
        record.map(|r| r.category)
    }

    fn from_category(&self) -> Option<AddressCategory> {
        Self::category(self.from)
    }

    fn to_category(&self) -> Option<AddressCategory> {
        Self::category(self.to)
    }

    fn entity(record: Option<&AddressRecord>) -> &str {
        record
            .map(|r| r.entity_name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("unknown")
    }
}

/// P1 — CEX classification. Exchange → user is a BUY (withdrawal), user →
/// exchange is a SELL (deposit). Both sides known exchanges is an internal
/// shuffle with no directional meaning.
pub fn cex_classification(ctx: &PhaseContext) -> Option<PhaseResult> {
    let from_cex = ctx.from_category() == Some(AddressCategory::Cex);
    let to_cex = ctx.to_category() == Some(AddressCategory::Cex);

    let (classification, confidence, evidence) = match (from_cex, to_cex) {
        (true, true) => (
            Classification::Transfer,
            0.75,
            format!(
                "CEX internal transfer: {} → {}",
                PhaseContext::entity(ctx.from),
                PhaseContext::entity(ctx.to)
            ),
        ),
        (true, false) => (
            Classification::Buy,
            0.85,
            format!(
                "CEX withdrawal from {}: exchange → user (BUY)",
                PhaseContext::entity(ctx.from)
            ),
        ),
        (false, true) => (
            Classification::Sell,
            0.85,
            format!(
                "CEX deposit to {}: user → exchange (SELL)",
                PhaseContext::entity(ctx.to)
            ),
        ),
        (false, false) => return None,
    };

    Some(PhaseResult {
        phase: PhaseId::CexClassification,
        classification,
        confidence,
        weight: ctx.weights.cex,
        evidence,
        whale_signals: vec![],
    })
}

/// P2 — DEX/protocol classification with directional logic. Only fires for
/// verified protocol contracts; a coincidental weak tag on a user wallet
/// must not turn a user-to-user transfer into a protocol interaction.
pub fn dex_protocol_classification(ctx: &PhaseContext) -> Option<PhaseResult> {
    let from_protocol = ctx.from.filter(|r| r.is_verified_protocol());
    let to_protocol = ctx.to.filter(|r| r.is_verified_protocol());

    // Bridge on either side overrides everything: the asset changes venue,
    // not hands.
    if let Some(bridge) = [from_protocol, to_protocol]
        .into_iter()
        .flatten()
        .find(|r| r.category == AddressCategory::Bridge)
    {
        return Some(PhaseResult {
            phase: PhaseId::DexProtocolClassification,
            classification: Classification::Transfer,
            confidence: 0.85,
            weight: ctx.weights.dex,
            evidence: format!("bridge interaction ({}): TRANSFER override", bridge.entity_name),
            whale_signals: vec!["bridge_interaction".to_string()],
        });
    }

    let (classification, confidence, evidence) = match (from_protocol, to_protocol) {
        (Some(a), Some(b)) => (
            Classification::Transfer,
            0.60,
            format!("protocol-to-protocol flow: {} → {}", a.entity_name, b.entity_name),
        ),
        (None, Some(proto)) => match proto.category {
            AddressCategory::DexRouter | AddressCategory::DexFactory => (
                Classification::Sell,
                0.82,
                format!("user → DEX router ({}): SELL", proto.entity_name),
            ),
            AddressCategory::LendingPool => (
                Classification::Buy,
                0.80,
                format!("lending deposit into {}: BUY", proto.entity_name),
            ),
            AddressCategory::StakingContract => (
                Classification::Buy,
                0.80,
                format!("staking deposit into {}: BUY (investment posture)", proto.entity_name),
            ),
            _ => return None,
        },
        (Some(proto), None) => match proto.category {
            AddressCategory::DexRouter | AddressCategory::DexFactory => (
                Classification::Buy,
                0.82,
                format!("DEX router ({}) → user: BUY", proto.entity_name),
            ),
            AddressCategory::LendingPool => (
                Classification::Sell,
                0.80,
                format!("lending withdrawal from {}: SELL", proto.entity_name),
            ),
            AddressCategory::StakingContract => (
                Classification::Sell,
                0.80,
                format!("unstaking from {}: SELL", proto.entity_name),
            ),
            _ => return None,
        },
        (None, None) => return None,
    };

    Some(PhaseResult {
        phase: PhaseId::DexProtocolClassification,
        classification,
        confidence,
        weight: ctx.weights.dex,
        evidence,
        whale_signals: vec!["verified_protocol".to_string()],
    })
}

/// P3 — stablecoin-flow heuristic. When the adapter attached swap context
/// (token in/out), stable↔volatile direction is a strong signal; a bare
/// stablecoin transfer carries no direction at all.
pub fn stablecoin_flow(ctx: &PhaseContext) -> Option<PhaseResult> {
    let raw = ctx.event.raw.as_ref();
    let token_in = raw
        .and_then(|r| r.get("token_in_symbol"))
        .and_then(|v| v.as_str());
    let token_out = raw
        .and_then(|r| r.get("token_out_symbol"))
        .and_then(|v| v.as_str());

    if let (Some(token_in), Some(token_out)) = (token_in, token_out) {
        let in_stable = ctx.stablecoins.contains(&token_in.to_uppercase());
        let out_stable = ctx.stablecoins.contains(&token_out.to_uppercase());

        let (classification, confidence, evidence) = match (in_stable, out_stable) {
            // Spending stablecoin to acquire the token.
            (true, false) => (
                Classification::Buy,
                0.90,
                format!("stablecoin flow: {} → {} (BUY)", token_in, token_out),
            ),
            // Exiting the token into stablecoin.
            (false, true) => (
                Classification::Sell,
                0.90,
                format!("stablecoin flow: {} → {} (SELL)", token_in, token_out),
            ),
            _ => return None,
        };

        return Some(PhaseResult {
            phase: PhaseId::StablecoinFlow,
            classification,
            confidence,
            weight: ctx.weights.stablecoin,
            evidence,
            whale_signals: vec![],
        });
    }

    if ctx.stablecoins.contains(&ctx.event.symbol.to_uppercase()) {
        return Some(PhaseResult {
            phase: PhaseId::StablecoinFlow,
            classification: Classification::Transfer,
            confidence: 0.35,
            weight: ctx.weights.stablecoin,
            evidence: format!("{} transfer: stablecoin carries no direction", ctx.event.symbol),
            whale_signals: vec![],
        });
    }

    None
}

/// P4 — market-maker / mixer / sanctions adjustment.
pub fn market_maker_adjustment(ctx: &PhaseContext) -> Option<PhaseResult> {
    let mixer = [ctx.from, ctx.to]
        .into_iter()
        .flatten()
        .find(|r| r.category == AddressCategory::MixerSanctioned);
    if let Some(mixer) = mixer {
        return Some(PhaseResult {
            phase: PhaseId::MarketMakerAdjustment,
            classification: Classification::Transfer,
            confidence: 0.50,
            weight: ctx.weights.market_maker,
            evidence: format!("mixer/sanctioned counterparty: {}", mixer.entity_name),
            whale_signals: vec!["mixer_sanctioned".to_string()],
        });
    }

    let from_mm = ctx.from_category() == Some(AddressCategory::MarketMaker);
    let to_mm = ctx.to_category() == Some(AddressCategory::MarketMaker);
    let (classification, evidence) = match (from_mm, to_mm) {
        (true, false) => (
            Classification::Buy,
            format!("market maker {} providing liquidity", PhaseContext::entity(ctx.from)),
        ),
        (false, true) => (
            Classification::Sell,
            format!("market maker {} absorbing liquidity", PhaseContext::entity(ctx.to)),
        ),
        _ => return None,
    };

    Some(PhaseResult {
        phase: PhaseId::MarketMakerAdjustment,
        classification,
        confidence: 0.60,
        weight: ctx.weights.market_maker,
        evidence,
        whale_signals: vec!["market_maker".to_string()],
    })
}

lazy_static! {
    static ref EVM_ADDRESS_RE: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
    static ref XRP_ADDRESS_RE: Regex = Regex::new(r"^r[1-9A-HJ-NP-Za-km-z]{24,34}$").unwrap();
}

const EXCHANGE_KEYWORDS: [&str; 11] = [
    "exchange", "binance", "kraken", "coinbase", "huobi", "okex", "bitfinex", "bittrex", "kucoin",
    "bitstamp", "gemini",
];

/// Shape points: well-formed chain address plus any embedded exchange
/// keywords. Two or more points marks the address exchange-like.
fn address_shape_points(address: &str) -> u32 {
    let lower = address.to_lowercase();
    let mut points = 0;
    if EVM_ADDRESS_RE.is_match(address) {
        points += 1;
    }
    if XRP_ADDRESS_RE.is_match(address) {
        points += 1;
    }
    for keyword in EXCHANGE_KEYWORDS {
        if lower.contains(keyword) {
            points += 1;
        }
    }
    points
}

fn looks_like_exchange(address: &str) -> bool {
    address_shape_points(address) >= 2
}

/// P5 — blockchain-specific heuristic for events none of the structural
/// phases could read. Runs only when P1–P4 stayed below the moderate
/// threshold.
pub fn chain_heuristic(ctx: &PhaseContext) -> Option<PhaseResult> {
    let from_exchange_like = looks_like_exchange(&ctx.event.from_addr);
    let to_exchange_like = looks_like_exchange(&ctx.event.to_addr);

    let (classification, confidence, evidence) = match (from_exchange_like, to_exchange_like) {
        (true, false) => (
            Classification::Buy,
            0.45,
            "address-shape heuristic: sender resembles an exchange (BUY)".to_string(),
        ),
        (false, true) => (
            Classification::Sell,
            0.45,
            "address-shape heuristic: receiver resembles an exchange (SELL)".to_string(),
        ),
        _ => (
            Classification::Transfer,
            0.30,
            "user-to-user transfer (no exchange involvement detected)".to_string(),
        ),
    };

    Some(PhaseResult {
        phase: PhaseId::ChainHeuristic,
        classification,
        confidence,
        weight: ctx.weights.heuristic,
        evidence,
        whale_signals: vec![],
    })
}

/// P6 — wallet-behavior analysis over AIS tags and balances. Mostly a
/// whale-signal producer; only an `mev_bot` tag carries a (weak)
/// directional meaning.
pub fn wallet_behavior(ctx: &PhaseContext) -> Option<PhaseResult> {
    let mut signals = Vec::new();
    let mut classification = Classification::Unknown;
    let mut confidence = 0.0;

    for record in [ctx.from, ctx.to].into_iter().flatten() {
        if record.balance_usd.unwrap_or(0.0) >= 1_000_000.0 {
            signals.push("high_balance_counterparty".to_string());
        }
        if record.has_tag("whale") || record.has_tag("mega_whale") {
            signals.push("tagged_whale".to_string());
        }
        if record.has_tag("high_activity") {
            signals.push("high_activity_wallet".to_string());
        }
        if record.has_tag("mev_bot") {
            signals.push("mev_bot_counterparty".to_string());
            classification = Classification::Transfer;
            confidence = 0.45;
        }
    }

    if signals.is_empty() {
        return None;
    }
    signals.sort();
    signals.dedup();

    Some(PhaseResult {
        phase: PhaseId::WalletBehavior,
        classification,
        confidence,
        weight: ctx.weights.wallet_behavior,
        evidence: format!("wallet behavior: {}", signals.join(", ")),
        whale_signals: signals,
    })
}
