//! Rolling sentiment aggregation: per-token buy/sell ratios and
//! volume-weighted sentiment over a time window of classified events.
//!
//! The aggregator is read-only over the event store and publishes each
//! tick's snapshot set atomically, so readers see either the previous or
//! the new full set, never a mix.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::{Classification, SentimentSnapshot};
use crate::store::{ClassifiedEventStore, EventFilter};

#[derive(Default)]
struct TokenWindow {
    buys: u64,
    sells: u64,
    buy_volume: f64,
    sell_volume: f64,
    total_volume: f64,
    confidence_sum: f64,
    whale_score_sum: f64,
}

pub struct SentimentAggregator {
    store: Arc<ClassifiedEventStore>,
    latest: RwLock<Arc<Vec<SentimentSnapshot>>>,
    window_seconds: u64,
    min_transactions: u64,
}

impl SentimentAggregator {
    pub fn new(store: Arc<ClassifiedEventStore>, window_seconds: u64, min_transactions: u64) -> Self {
        Self {
            store,
            latest: RwLock::new(Arc::new(Vec::new())),
            window_seconds,
            min_transactions,
        }
    }

    /// Compute sentiment over the given window. Pure over the store
    /// contents; only BUY/SELL events contribute. Tokens with no
    /// directional activity produce no snapshot, so an empty window yields
    /// an empty set rather than division by zero.
    pub async fn compute(&self, window_seconds: u64) -> Vec<SentimentSnapshot> {
        let now = Utc::now();
        let since = now.timestamp() - window_seconds as i64;

        let events = self
            .store
            .recent_by_filter(&EventFilter {
                since_ts: Some(since),
                ..Default::default()
            })
            .await;

        let mut windows: HashMap<String, TokenWindow> = HashMap::new();
        for event in events {
            if !event.classification.is_directional() {
                continue;
            }
            let window = windows.entry(event.symbol.clone()).or_default();
            window.total_volume += event.usd_value;
            window.confidence_sum += event.confidence;
            window.whale_score_sum += event.whale_score;
            match event.classification {
                Classification::Buy => {
                    window.buys += 1;
                    window.buy_volume += event.usd_value;
                }
                Classification::Sell => {
                    window.sells += 1;
                    window.sell_volume += event.usd_value;
                }
                _ => {}
            }
        }

        let mut snapshots: Vec<SentimentSnapshot> = windows
            .into_iter()
            .filter_map(|(symbol, w)| {
                let total_directional = w.buys + w.sells;
                if total_directional == 0 {
                    return None;
                }
                let buy_pct = w.buys as f64 / total_directional as f64 * 100.0;
                let sell_pct = w.sells as f64 / total_directional as f64 * 100.0;

                let directional_volume = w.buy_volume + w.sell_volume;
                let volume_weighted_buy_pct = if directional_volume > 0.0 {
                    w.buy_volume / directional_volume * 100.0
                } else {
                    0.0
                };

                Some(SentimentSnapshot {
                    symbol,
                    window_seconds,
                    buys: w.buys,
                    sells: w.sells,
                    total_directional,
                    buy_pct: round2(buy_pct),
                    sell_pct: round2(sell_pct),
                    volume_weighted_buy_pct: round2(volume_weighted_buy_pct),
                    sentiment_score: round2(buy_pct - sell_pct),
                    volume_sentiment_score: round2(volume_weighted_buy_pct - (100.0 - volume_weighted_buy_pct)),
                    avg_confidence: round2(w.confidence_sum / total_directional as f64),
                    avg_whale_score: round2(w.whale_score_sum / total_directional as f64),
                    total_volume_usd: w.total_volume,
                    calculated_at: now,
                })
            })
            .collect();

        // Most active tokens first.
        snapshots.sort_by(|a, b| b.total_directional.cmp(&a.total_directional));
        snapshots
    }

    /// Latest published snapshot set (atomic swap on each tick).
    pub async fn latest(&self) -> Arc<Vec<SentimentSnapshot>> {
        Arc::clone(&*self.latest.read().await)
    }

    /// Tokens with the highest buy percentage, at least `min_transactions`
    /// directional events, top 10.
    pub async fn bullish(&self) -> Vec<SentimentSnapshot> {
        let mut tokens: Vec<SentimentSnapshot> = self
            .latest()
            .await
            .iter()
            .filter(|s| s.total_directional >= self.min_transactions)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.buy_pct.partial_cmp(&a.buy_pct).unwrap_or(std::cmp::Ordering::Equal));
        tokens.truncate(10);
        tokens
    }

    /// Tokens with the highest sell percentage, same filter as `bullish`.
    pub async fn bearish(&self) -> Vec<SentimentSnapshot> {
        let mut tokens: Vec<SentimentSnapshot> = self
            .latest()
            .await
            .iter()
            .filter(|s| s.total_directional >= self.min_transactions)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.sell_pct.partial_cmp(&a.sell_pct).unwrap_or(std::cmp::Ordering::Equal));
        tokens.truncate(10);
        tokens
    }

    pub async fn refresh(&self) -> usize {
        let snapshots = self.compute(self.window_seconds).await;
        let count = snapshots.len();
        *self.latest.write().await = Arc::new(snapshots);
        count
    }

    fn log_summary(snapshots: &[SentimentSnapshot]) {
        if snapshots.is_empty() {
            debug!("No whale sentiment data in window");
            return;
        }
        debug!(
            "{:<10} {:>6} {:>6} {:>7} {:>7} {:>12} {:>10}",
            "TOKEN", "BUYS", "SELLS", "BUY%", "SELL%", "VOLUME", "SENTIMENT"
        );
        for snap in snapshots.iter().take(15) {
            debug!(
                "{:<10} {:>6} {:>6} {:>6.1}% {:>6.1}% ${:>10.0} {:>10.1}",
                snap.symbol,
                snap.buys,
                snap.sells,
                snap.buy_pct,
                snap.sell_pct,
                snap.total_volume_usd,
                snap.sentiment_score
            );
        }
    }
}

/// Fixed-tick aggregation task.
pub async fn run_sentiment_task(
    aggregator: Arc<SentimentAggregator>,
    tick_seconds: u64,
    cancel: CancellationToken,
) {
    info!("✅ Sentiment aggregator started (tick: {}s)", tick_seconds);
    let mut ticker = interval(Duration::from_secs(tick_seconds));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let count = aggregator.refresh().await;
                let latest = aggregator.latest().await;
                SentimentAggregator::log_summary(&latest);
                debug!("Sentiment tick complete: {} tokens", count);
            }
        }
    }

    info!("Sentiment aggregator stopped");
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedEvent, SourceId};
    use uuid::Uuid;

    fn classified(symbol: &str, class: Classification, usd: f64, ts: i64) -> ClassifiedEvent {
        ClassifiedEvent {
            trace_id: Uuid::new_v4(),
            source: SourceId::EthPoll,
            blockchain: "ethereum".to_string(),
            tx_hash: format!("0x{}", Uuid::new_v4().simple()),
            log_index: 0,
            from_addr: "0xfrom".to_string(),
            to_addr: "0xto".to_string(),
            symbol: symbol.to_string(),
            amount: 1.0,
            usd_value: usd,
            timestamp: ts,
            classification: class,
            confidence: 0.8,
            whale_score: 50.0,
            is_whale: false,
            whale_signals: vec![],
            evidence: vec![],
            phases_completed: 4,
            cost_optimized: true,
            reasoning: String::new(),
        }
    }

    async fn seeded_store() -> Arc<ClassifiedEventStore> {
        let store = Arc::new(ClassifiedEventStore::new(
            std::time::Duration::from_secs(7200),
            10_000,
        ));
        let now = Utc::now().timestamp();
        // S6: 7 buys, 3 sells, equal volumes, spread over 10 minutes.
        for i in 0..7 {
            store
                .insert(classified("FOO", Classification::Buy, 10_000.0, now - 60 * i))
                .await;
        }
        for i in 0..3 {
            store
                .insert(classified("FOO", Classification::Sell, 10_000.0, now - 60 * i - 30))
                .await;
        }
        store
    }

    #[tokio::test]
    async fn test_s6_mixed_flow_sentiment() {
        let store = seeded_store().await;
        let aggregator = SentimentAggregator::new(store, 7200, 3);
        let snapshots = aggregator.compute(7200).await;

        assert_eq!(snapshots.len(), 1);
        let foo = &snapshots[0];
        assert_eq!(foo.buys, 7);
        assert_eq!(foo.sells, 3);
        assert_eq!(foo.total_directional, 10);
        assert_eq!(foo.buy_pct, 70.0);
        assert_eq!(foo.sell_pct, 30.0);
        assert_eq!(foo.sentiment_score, 40.0);
        assert_eq!(foo.volume_weighted_buy_pct, 70.0);
        assert_eq!(foo.trend(), "bullish");
    }

    #[tokio::test]
    async fn test_empty_window_yields_empty_set() {
        let store = Arc::new(ClassifiedEventStore::new(
            std::time::Duration::from_secs(7200),
            10_000,
        ));
        let aggregator = SentimentAggregator::new(store, 7200, 3);
        assert!(aggregator.compute(7200).await.is_empty());
    }

    #[tokio::test]
    async fn test_transfers_do_not_count_as_directional() {
        let store = Arc::new(ClassifiedEventStore::new(
            std::time::Duration::from_secs(7200),
            10_000,
        ));
        let now = Utc::now().timestamp();
        store
            .insert(classified("BAR", Classification::Transfer, 9_000.0, now))
            .await;
        let aggregator = SentimentAggregator::new(store, 7200, 3);
        assert!(aggregator.compute(7200).await.is_empty());
    }

    #[tokio::test]
    async fn test_bullish_filters_thin_tokens() {
        let store = seeded_store().await;
        let now = Utc::now().timestamp();
        // Thin token: 1 buy, below min_transactions.
        store
            .insert(classified("THIN", Classification::Buy, 5_000.0, now))
            .await;

        let aggregator = SentimentAggregator::new(store, 7200, 3);
        aggregator.refresh().await;

        let bullish = aggregator.bullish().await;
        assert_eq!(bullish.len(), 1);
        assert_eq!(bullish[0].symbol, "FOO");
    }

    #[tokio::test]
    async fn test_atomic_publication() {
        let store = seeded_store().await;
        let aggregator = SentimentAggregator::new(store, 7200, 3);

        assert!(aggregator.latest().await.is_empty());
        aggregator.refresh().await;
        let published = aggregator.latest().await;
        assert_eq!(published.len(), 1);
    }

    #[tokio::test]
    async fn test_window_excludes_old_events() {
        let store = Arc::new(ClassifiedEventStore::new(
            std::time::Duration::from_secs(100_000),
            10_000,
        ));
        let now = Utc::now().timestamp();
        store
            .insert(classified("OLD", Classification::Buy, 5_000.0, now - 90_000))
            .await;
        store
            .insert(classified("NEW", Classification::Buy, 5_000.0, now))
            .await;

        let aggregator = SentimentAggregator::new(store, 7200, 1);
        let snapshots = aggregator.compute(7200).await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].symbol, "NEW");
    }
}
