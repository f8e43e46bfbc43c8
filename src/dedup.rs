//! Deduplicator: exactly-once forwarding keyed by chain-specific identity.
//!
//! Single-writer discipline: one task owns the map and consumes the merged
//! adapter stream, so the exactly-once guarantee holds under parallel
//! adapter sends without locking the hot path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EventReceiver;
use crate::models::{DedupKey, RawEvent};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainDedupStats {
    pub total: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupStats {
    pub total_received: u64,
    pub duplicates_caught: u64,
    pub unique_transactions: u64,
    pub by_chain: HashMap<String, ChainDedupStats>,
}

impl DedupStats {
    pub fn dedup_ratio(&self) -> f64 {
        if self.total_received == 0 {
            return 0.0;
        }
        self.duplicates_caught as f64 / self.total_received as f64 * 100.0
    }
}

pub struct Deduplicator {
    entries: HashMap<DedupKey, RawEvent>,
    stats: DedupStats,
    retention: Duration,
}

impl Deduplicator {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            stats: DedupStats::default(),
            retention,
        }
    }

    /// First arrival of a key wins and is forwarded; later duplicates may
    /// enrich the stored event (a native adapter's richer data overriding
    /// an earlier vendor-feed report) but are never re-emitted.
    pub fn accept(&mut self, event: RawEvent) -> Option<RawEvent> {
        self.stats.total_received += 1;
        let key = event.dedup_key();
        let is_duplicate = self.entries.contains_key(&key);

        let chain_stats = self
            .stats
            .by_chain
            .entry(event.blockchain.clone())
            .or_default();
        chain_stats.total += 1;
        if is_duplicate {
            chain_stats.duplicates += 1;
        }

        if let Some(stored) = self.entries.get_mut(&key) {
            self.stats.duplicates_caught += 1;

            if stored.usd_value <= 0.0 && event.usd_value > 0.0 {
                stored.usd_value = event.usd_value;
                stored.amount = event.amount;
            }
            if stored.raw.is_none() && event.raw.is_some() {
                stored.raw = event.raw;
            }
            debug!(
                chain = %stored.blockchain,
                tx_hash = %stored.tx_hash,
                "Duplicate collapsed"
            );
            return None;
        }

        self.entries.insert(key, event.clone());
        self.stats.unique_transactions = self.entries.len() as u64;
        Some(event)
    }

    /// Entries older than the retention window are eligible for removal;
    /// nothing is evicted earlier so duplicates within realistic
    /// reorg/reporting-lag windows are still caught.
    pub fn sweep(&mut self, now_ts: i64) {
        let cutoff = now_ts - self.retention.as_secs() as i64;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.timestamp >= cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Dedup sweep removed {} expired entries", removed);
        }
        self.stats.unique_transactions = self.entries.len() as u64;
    }

    pub fn stats(&self) -> &DedupStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared read-side handle; the dedup task refreshes it after every batch
/// so the stats endpoint never touches the map itself.
pub type SharedDedupStats = Arc<RwLock<DedupStats>>;

/// Long-lived dedup task: adapters feed the shedding event queue, unique
/// events go out on `unique_tx` toward the engine.
pub async fn run_dedup_task(
    mut dedup: Deduplicator,
    mut raw_rx: EventReceiver,
    unique_tx: mpsc::Sender<RawEvent>,
    shared_stats: SharedDedupStats,
    cancel: CancellationToken,
) {
    info!("✅ Deduplicator task started");
    let mut sweep_tick = interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            _ = sweep_tick.tick() => {
                dedup.sweep(chrono::Utc::now().timestamp());
                *shared_stats.write().await = dedup.stats().clone();
            }
            maybe_event = raw_rx.recv() => {
                let Some(event) = maybe_event else {
                    // All adapters closed their senders.
                    break;
                };
                if let Some(unique) = dedup.accept(event) {
                    if unique_tx.send(unique).await.is_err() {
                        warn!("⚠️ Engine channel closed, deduplicator exiting");
                        break;
                    }
                }
                *shared_stats.write().await = dedup.stats().clone();
            }
        }
    }

    *shared_stats.write().await = dedup.stats().clone();
    info!("Deduplicator task drained ({} unique keys)", dedup.len());
}
