//! Classified Event Store: in-memory time-ordered window of recent
//! classified events plus process-lifetime per-token counters.
//!
//! Writes come from the engine task only; readers (API handlers, the
//! sentiment aggregator, the shutdown report) take snapshots.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::models::{Classification, ClassifiedEvent, TokenCounter};

/// Per-token transfer volume tracking for the shutdown report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferVolume {
    pub volume: f64,
    pub transfers: u64,
    #[serde(skip)]
    pub addresses: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub min_value: Option<f64>,
    pub blockchain: Option<String>,
    pub symbol: Option<String>,
    pub classification: Option<Classification>,
    pub since_ts: Option<i64>,
    pub limit: usize,
}

struct StoreInner {
    events: VecDeque<ClassifiedEvent>,
    counters: HashMap<String, TokenCounter>,
    transfer_volumes: HashMap<String, TransferVolume>,
    evicted: u64,
}

pub struct ClassifiedEventStore {
    inner: RwLock<StoreInner>,
    retention: Duration,
    max_entries: usize,
}

impl ClassifiedEventStore {
    pub fn new(retention: Duration, max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                events: VecDeque::new(),
                counters: HashMap::new(),
                transfer_volumes: HashMap::new(),
                evicted: 0,
            }),
            retention,
            max_entries,
        }
    }

    pub async fn insert(&self, event: ClassifiedEvent) {
        let mut inner = self.inner.write().await;

        let counter = inner.counters.entry(event.symbol.clone()).or_default();
        match event.classification {
            Classification::Buy => {
                counter.buys += 1;
                counter.buy_volume_usd += event.usd_value;
            }
            Classification::Sell => {
                counter.sells += 1;
                counter.sell_volume_usd += event.usd_value;
            }
            Classification::Transfer => counter.transfers += 1,
            Classification::Unknown => {}
        }
        counter.confidence_sum += event.confidence;
        counter.whale_score_sum += event.whale_score;
        counter.tx_count += 1;

        let tracker = inner
            .transfer_volumes
            .entry(event.symbol.clone())
            .or_default();
        tracker.volume += event.amount;
        tracker.transfers += 1;
        tracker.addresses.insert(event.from_addr.clone());
        tracker.addresses.insert(event.to_addr.clone());

        inner.events.push_back(event);
        while inner.events.len() > self.max_entries {
            inner.events.pop_front();
            inner.evicted += 1;
        }
    }

    /// Evict events older than the retention window. Insertion order only
    /// tracks per-adapter time, so the whole deque is scanned: a backed-off
    /// poller can land an old-timestamped event behind a fresher one.
    /// Counters are intentionally untouched: they are process-lifetime
    /// monotonic.
    pub async fn sweep(&self, now_ts: i64) -> usize {
        let cutoff = now_ts - self.retention.as_secs() as i64;
        let mut inner = self.inner.write().await;
        let before = inner.events.len();
        inner.events.retain(|e| e.timestamp >= cutoff);
        let removed = before - inner.events.len();
        inner.evicted += removed as u64;
        removed
    }

    /// Recent events matching the filter, newest first.
    pub async fn recent_by_filter(&self, filter: &EventFilter) -> Vec<ClassifiedEvent> {
        let inner = self.inner.read().await;
        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        let mut out = Vec::new();

        for event in inner.events.iter().rev() {
            if let Some(min) = filter.min_value {
                if event.usd_value < min {
                    continue;
                }
            }
            if let Some(chain) = &filter.blockchain {
                if !event.blockchain.eq_ignore_ascii_case(chain) {
                    continue;
                }
            }
            if let Some(symbol) = &filter.symbol {
                if !event.symbol.eq_ignore_ascii_case(symbol) {
                    continue;
                }
            }
            if let Some(class) = filter.classification {
                if event.classification != class {
                    continue;
                }
            }
            if let Some(since) = filter.since_ts {
                // Insertion order is per-adapter, not global; keep scanning.
                if event.timestamp < since {
                    continue;
                }
            }
            out.push(event.clone());
            if out.len() >= limit {
                break;
            }
        }
        out
    }

    pub async fn token_counters(&self) -> HashMap<String, TokenCounter> {
        self.inner.read().await.counters.clone()
    }

    pub async fn transfer_volumes(&self) -> HashMap<String, TransferVolume> {
        self.inner.read().await.transfer_volumes.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn evicted(&self) -> u64 {
        self.inner.read().await.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;
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
            whale_score: 40.0,
            is_whale: false,
            whale_signals: vec![],
            evidence: vec![],
            phases_completed: 2,
            cost_optimized: false,
            reasoning: String::new(),
        }
    }

    #[tokio::test]
    async fn test_counters_are_monotone() {
        let store = ClassifiedEventStore::new(Duration::from_secs(7200), 100);
        let now = chrono::Utc::now().timestamp();

        store.insert(classified("WETH", Classification::Buy, 10_000.0, now)).await;
        store.insert(classified("WETH", Classification::Sell, 5_000.0, now)).await;
        store.insert(classified("WETH", Classification::Transfer, 3_000.0, now)).await;

        let counters = store.token_counters().await;
        let weth = &counters["WETH"];
        assert_eq!(weth.buys, 1);
        assert_eq!(weth.sells, 1);
        assert_eq!(weth.transfers, 1);
        assert_eq!(weth.tx_count, 3);
        assert_eq!(weth.buy_volume_usd, 10_000.0);

        // Eviction does not decrement counters.
        store.sweep(now + 10_000).await;
        assert_eq!(store.len().await, 0);
        let counters = store.token_counters().await;
        assert_eq!(counters["WETH"].buys, 1);
    }

    #[tokio::test]
    async fn test_sweep_reaches_stale_events_behind_fresh_front() {
        let store = ClassifiedEventStore::new(Duration::from_secs(7200), 100);
        let now = chrono::Utc::now().timestamp();

        // A backed-off poller can insert an event with an old timestamp
        // after a fresher one is already at the front of the deque.
        store.insert(classified("FRESH", Classification::Buy, 5_000.0, now)).await;
        store.insert(classified("STALE", Classification::Buy, 5_000.0, now - 8_000)).await;

        let removed = store.sweep(now).await;
        assert_eq!(removed, 1);

        let remaining = store.recent_by_filter(&EventFilter::default()).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].symbol, "FRESH");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_first() {
        let store = ClassifiedEventStore::new(Duration::from_secs(7200), 2);
        let now = chrono::Utc::now().timestamp();

        store.insert(classified("A", Classification::Buy, 5_000.0, now - 3)).await;
        store.insert(classified("B", Classification::Buy, 5_000.0, now - 2)).await;
        store.insert(classified("C", Classification::Buy, 5_000.0, now - 1)).await;

        assert_eq!(store.len().await, 2);
        let all = store.recent_by_filter(&EventFilter::default()).await;
        let symbols: Vec<_> = all.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["C", "B"]);
        assert_eq!(store.evicted().await, 1);
    }

    #[tokio::test]
    async fn test_filters_and_together() {
        let store = ClassifiedEventStore::new(Duration::from_secs(7200), 100);
        let now = chrono::Utc::now().timestamp();

        store.insert(classified("WETH", Classification::Buy, 50_000.0, now)).await;
        store.insert(classified("WETH", Classification::Sell, 4_000.0, now)).await;
        store.insert(classified("LINK", Classification::Buy, 80_000.0, now)).await;

        let filter = EventFilter {
            min_value: Some(10_000.0),
            symbol: Some("weth".to_string()),
            classification: Some(Classification::Buy),
            ..Default::default()
        };
        let out = store.recent_by_filter(&filter).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].symbol, "WETH");
    }

    #[tokio::test]
    async fn test_limit_and_ordering() {
        let store = ClassifiedEventStore::new(Duration::from_secs(7200), 100);
        let now = chrono::Utc::now().timestamp();
        for i in 0..5 {
            store.insert(classified("WETH", Classification::Buy, 5_000.0, now + i)).await;
        }

        let filter = EventFilter {
            limit: 3,
            ..Default::default()
        };
        let out = store.recent_by_filter(&filter).await;
        assert_eq!(out.len(), 3);
        assert!(out[0].timestamp >= out[1].timestamp);
        assert!(out[1].timestamp >= out[2].timestamp);
    }

    #[tokio::test]
    async fn test_transfer_volume_tracking() {
        let store = ClassifiedEventStore::new(Duration::from_secs(7200), 100);
        let now = chrono::Utc::now().timestamp();
        store.insert(classified("XRP", Classification::Buy, 5_000.0, now)).await;
        store.insert(classified("XRP", Classification::Sell, 6_000.0, now)).await;

        let volumes = store.transfer_volumes().await;
        let xrp = &volumes["XRP"];
        assert_eq!(xrp.transfers, 2);
        assert_eq!(xrp.volume, 2.0);
        assert_eq!(xrp.addresses.len(), 2);
    }
}
