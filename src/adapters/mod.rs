//! Per-chain source adapters. Each adapter is a long-lived task owning its
//! own I/O, retries, and reconnect backoff, and produces the uniform
//! `RawEvent` stream consumed by the deduplicator.

mod evm_scan;
mod solana_poll;
mod solana_ws;
mod whale_alert;
mod xrp;

pub use evm_scan::EvmScanAdapter;
pub use solana_poll::SolanaPollAdapter;
pub use solana_ws::SolanaWsAdapter;
pub use whale_alert::WhaleAlertAdapter;
pub use xrp::XrpWsAdapter;

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::events::{EventSender, SendOutcome};
use crate::models::{RawEvent, SourceId};

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn source_id(&self) -> SourceId;
    fn stats(&self) -> AdapterStatsSnapshot;

    /// Produce events until cancellation (Ok) or an unrecoverable error
    /// (Err; the supervisor decides whether to restart).
    async fn run(&self, out: EventSender, cancel: CancellationToken) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct AdapterStats {
    fetched: AtomicU64,
    filtered_low_value: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    last_success_ts: AtomicI64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdapterStatsSnapshot {
    pub fetched: u64,
    pub filtered_low_value: u64,
    pub errors: u64,
    pub dropped: u64,
    pub last_success_ts: i64,
}

impl AdapterStats {
    pub fn record_fetched(&self, n: u64) {
        self.fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered_low_value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_success(&self) {
        self.last_success_ts
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AdapterStatsSnapshot {
        AdapterStatsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            filtered_low_value: self.filtered_low_value.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            last_success_ts: self.last_success_ts.load(Ordering::Relaxed),
        }
    }
}

/// Forward an event into the pipeline. The queue never blocks the source
/// I/O loop: under sustained backpressure it sheds its oldest pending
/// event, which is counted against this adapter's `dropped` stat.
pub(crate) fn emit(out: &EventSender, event: RawEvent, stats: &AdapterStats) -> AppResult<()> {
    match out.send(event) {
        SendOutcome::Queued => Ok(()),
        SendOutcome::ShedOldest => {
            stats.record_dropped();
            Ok(())
        }
        SendOutcome::Closed => Err(AppError::ChannelClosed("pipeline receiver gone".to_string())),
    }
}

/// Minimum-interval rate limiter for a single external endpoint. Adapters
/// block on this rather than issuing requests and retrying on 429.
pub struct MinIntervalLimiter {
    last: tokio::sync::Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl MinIntervalLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last: tokio::sync::Mutex::new(None),
            min_interval,
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                drop(last);
                tokio::time::sleep(wait).await;
                last = self.last.lock().await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Deduplicating log guard: a given parse-error message is logged once per
/// process, repeats are counted silently in adapter stats instead.
#[derive(Default)]
pub struct ErrorLogGuard {
    seen: Mutex<HashSet<String>>,
}

impl ErrorLogGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the message was not seen before (caller should log it).
    pub fn first_occurrence(&self, message: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(message.to_string())
    }
}

/// Vendor feeds name some chains differently than the native adapters;
/// dedup keys require a single spelling.
pub(crate) fn normalize_chain(blockchain: &str) -> String {
    match blockchain.to_lowercase().as_str() {
        "ripple" => "xrp".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_log_guard_dedups_messages() {
        let guard = ErrorLogGuard::new();
        assert!(guard.first_occurrence("bad value"));
        assert!(!guard.first_occurrence("bad value"));
        assert!(guard.first_occurrence("other error"));
    }

    #[test]
    fn test_chain_normalization() {
        assert_eq!(normalize_chain("Ripple"), "xrp");
        assert_eq!(normalize_chain("ETHEREUM"), "ethereum");
    }

    #[tokio::test]
    async fn test_min_interval_limiter_spaces_calls() {
        let limiter = MinIntervalLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    fn test_event(hash: &str) -> RawEvent {
        RawEvent {
            source: SourceId::EthPoll,
            blockchain: "ethereum".to_string(),
            tx_hash: hash.to_string(),
            log_index: 0,
            sequence: 0,
            block_ref: None,
            from_addr: "0xa".to_string(),
            to_addr: "0xb".to_string(),
            symbol: "WETH".to_string(),
            amount: 1.0,
            usd_value: 3_000.0,
            timestamp: 0,
            raw: None,
        }
    }

    #[tokio::test]
    async fn test_emit_sheds_oldest_on_backpressure() {
        let stats = AdapterStats::default();
        let (tx, mut rx) = crate::events::event_queue(1);

        emit(&tx, test_event("0xold"), &stats).unwrap();
        emit(&tx, test_event("0xnew"), &stats).unwrap();
        assert_eq!(stats.snapshot().dropped, 1);

        // The oldest pending event is the one that was shed.
        assert_eq!(rx.recv().await.unwrap().tx_hash, "0xnew");
    }

    #[tokio::test]
    async fn test_emit_errors_when_pipeline_gone() {
        let stats = AdapterStats::default();
        let (tx, rx) = crate::events::event_queue(1);
        drop(rx);
        assert!(emit(&tx, test_event("0x1"), &stats).is_err());
    }
}
