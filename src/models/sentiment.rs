use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-symbol monotonic counters maintained by the classified event store.
/// Process-lifetime; reset only on restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCounter {
    pub buys: u64,
    pub sells: u64,
    pub transfers: u64,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub confidence_sum: f64,
    pub whale_score_sum: f64,
    pub tx_count: u64,
}

impl TokenCounter {
    pub fn total_directional(&self) -> u64 {
        self.buys + self.sells
    }

    pub fn buy_percentage(&self) -> f64 {
        let total = self.total_directional();
        if total == 0 {
            return 0.0;
        }
        self.buys as f64 / total as f64 * 100.0
    }
}

/// Rolling-window sentiment for one token, published atomically by the
/// aggregator on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub symbol: String,
    pub window_seconds: u64,
    pub buys: u64,
    pub sells: u64,
    pub total_directional: u64,
    pub buy_pct: f64,
    pub sell_pct: f64,
    pub volume_weighted_buy_pct: f64,
    pub sentiment_score: f64,
    pub volume_sentiment_score: f64,
    pub avg_confidence: f64,
    pub avg_whale_score: f64,
    pub total_volume_usd: f64,
    pub calculated_at: DateTime<Utc>,
}

impl SentimentSnapshot {
    pub fn trend(&self) -> &'static str {
        if self.buy_pct > 60.0 {
            "bullish"
        } else if self.sell_pct > 60.0 {
            "bearish"
        } else {
            "neutral"
        }
    }
}
