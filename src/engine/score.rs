//! Whale scoring: a 0–100 composite of transaction size, counterparty
//! balance, and behavioral tags. Orthogonal to the BUY/SELL/TRANSFER
//! classification.

use crate::config::WhaleThresholds;
use crate::models::{AddressCategory, AddressRecord, RawEvent};

pub struct WhaleScore {
    pub score: f64,
    pub signals: Vec<String>,
}

pub fn score_event(
    event: &RawEvent,
    from: Option<&AddressRecord>,
    to: Option<&AddressRecord>,
    verified_protocol: bool,
    thresholds: &WhaleThresholds,
) -> WhaleScore {
    let mut signals = Vec::new();
    let usd = event.usd_value;

    let mut score = if usd >= thresholds.mega_whale_usd {
        signals.push("mega_whale_transaction".to_string());
        90.0
    } else if usd >= thresholds.whale_usd {
        signals.push("whale_transaction".to_string());
        75.0
    } else if usd >= thresholds.large_trader_usd {
        signals.push("large_trader".to_string());
        55.0
    } else if usd >= thresholds.medium_trader_usd {
        30.0
    } else {
        // Proportional below the medium-trader band.
        usd / thresholds.medium_trader_usd * 30.0
    };

    let sides = [from, to];

    if sides
        .iter()
        .flatten()
        .any(|r| r.balance_usd.unwrap_or(0.0) >= 1_000_000.0)
    {
        score += 10.0;
        signals.push("high_balance_counterparty".to_string());
    }

    if sides
        .iter()
        .flatten()
        .any(|r| r.has_tag("whale") || r.has_tag("mega_whale"))
    {
        score += 10.0;
        signals.push("tagged_whale".to_string());
    }

    // EVM priority fee in the top decile reads as urgency.
    let gas_urgent = event
        .raw
        .as_ref()
        .and_then(|r| r.get("priority_fee_percentile"))
        .and_then(|v| v.as_f64())
        .map(|p| p >= 90.0)
        .unwrap_or(false);
    if gas_urgent {
        score += 5.0;
        signals.push("gas_urgency".to_string());
    }

    if verified_protocol {
        score += 5.0;
    }

    if sides
        .iter()
        .flatten()
        .any(|r| r.category == AddressCategory::MarketMaker)
    {
        score -= 15.0;
        signals.push("market_maker_discount".to_string());
    }

    if sides
        .iter()
        .flatten()
        .any(|r| r.category == AddressCategory::MixerSanctioned)
    {
        score -= 25.0;
        signals.push("mixer_sanctioned_discount".to_string());
    }

    WhaleScore {
        score: score.clamp(0.0, 100.0),
        signals,
    }
}
