//! Supervisor: starts every pipeline task, restarts failed adapters with
//! capped backoff, marks repeat offenders degraded, and coordinates
//! shutdown through a single cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::SourceAdapter;
use crate::config::Config;
use crate::dedup::{run_dedup_task, Deduplicator, SharedDedupStats};
use crate::engine::{run_engine_task, WhaleIntelligenceEngine};
use crate::events::{event_queue, EventSender};
use crate::resilience::{Backoff, FailureTracker};
use crate::sentiment::{run_sentiment_task, SentimentAggregator};
use crate::store::ClassifiedEventStore;

const PIPELINE_CHANNEL_CAPACITY: usize = 1024;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
// An adapter that survived this long gets its failure history wiped.
const HEALTHY_RUN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdapterHealth {
    pub running: bool,
    pub degraded: bool,
    pub restarts: u32,
}

pub struct Supervisor {
    cancel: CancellationToken,
    health: Arc<RwLock<HashMap<String, AdapterHealth>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    all_degraded: Arc<Notify>,
    grace: Duration,
}

impl Supervisor {
    /// Wire the channels and spawn the full pipeline: adapters → dedup →
    /// engine → store, plus the store sweeper and the sentiment ticker.
    pub async fn start(
        config: Arc<Config>,
        engine: Arc<WhaleIntelligenceEngine>,
        store: Arc<ClassifiedEventStore>,
        aggregator: Arc<SentimentAggregator>,
        dedup_stats: SharedDedupStats,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let health = Arc::new(RwLock::new(HashMap::new()));
        let all_degraded = Arc::new(Notify::new());
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // Adapter-facing hop is the shedding queue (oldest pending event
        // dropped under backpressure); dedup → engine stays a plain
        // bounded channel because the dedup task may block there safely.
        let (raw_tx, raw_rx) = event_queue(PIPELINE_CHANNEL_CAPACITY);
        let (unique_tx, unique_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);

        tasks.push(tokio::spawn(run_dedup_task(
            Deduplicator::new(Duration::from_secs(config.ces_retention_seconds)),
            raw_rx,
            unique_tx,
            Arc::clone(&dedup_stats),
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(run_engine_task(
            Arc::clone(&engine),
            unique_rx,
            Arc::clone(&store),
            cancel.clone(),
        )));

        // Store sweeper.
        {
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(SWEEP_INTERVAL);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let removed = store.sweep(chrono::Utc::now().timestamp()).await;
                            if removed > 0 {
                                info!("🧹 Store sweep evicted {} expired events", removed);
                            }
                        }
                    }
                }
            }));
        }

        tasks.push(tokio::spawn(run_sentiment_task(
            Arc::clone(&aggregator),
            config.sentiment_tick_seconds,
            cancel.clone(),
        )));

        {
            let mut map = health.write().await;
            for adapter in &adapters {
                map.insert(adapter.name().to_string(), AdapterHealth::default());
            }
        }

        let adapter_count = adapters.len();
        for adapter in adapters {
            tasks.push(Self::spawn_adapter(
                adapter,
                raw_tx.clone(),
                cancel.clone(),
                Arc::clone(&health),
                Arc::clone(&all_degraded),
                Arc::clone(&config),
                adapter_count,
            ));
        }
        // The dedup task must observe channel closure once every adapter
        // task is gone.
        drop(raw_tx);

        info!("✅ Supervisor started {} adapter task(s)", adapter_count);

        Self {
            cancel,
            health,
            tasks: Mutex::new(tasks),
            all_degraded,
            grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }

    fn spawn_adapter(
        adapter: Arc<dyn SourceAdapter>,
        out: EventSender,
        cancel: CancellationToken,
        health: Arc<RwLock<HashMap<String, AdapterHealth>>>,
        all_degraded: Arc<Notify>,
        config: Arc<Config>,
        adapter_count: usize,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let name = adapter.name().to_string();
            let mut backoff = Backoff::new(
                Duration::from_secs(config.restart.backoff_base_secs),
                Duration::from_secs(config.restart.backoff_cap_secs),
            );
            let mut failures = FailureTracker::new(config.restart.max_consecutive_failures);

            {
                let mut map = health.write().await;
                if let Some(entry) = map.get_mut(&name) {
                    entry.running = true;
                }
            }

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let started = Instant::now();
                match adapter.run(out.clone(), cancel.clone()).await {
                    Ok(()) => break, // cooperative exit on cancellation
                    Err(e) => {
                        if started.elapsed() >= HEALTHY_RUN {
                            backoff.reset();
                            failures.record_success();
                        }
                        failures.record_failure();

                        if failures.is_degraded() {
                            error!(
                                adapter = %name,
                                error = %e,
                                "❌ Adapter degraded after {} consecutive failures",
                                failures.consecutive_failures()
                            );
                            let mut map = health.write().await;
                            if let Some(entry) = map.get_mut(&name) {
                                entry.degraded = true;
                                entry.running = false;
                            }
                            // notify_one stores a permit, so the waiter
                            // cannot miss a notification raced with its
                            // degraded-check.
                            if adapter_count > 0 && map.values().all(|h| h.degraded) {
                                all_degraded.notify_one();
                            }
                            return;
                        }

                        let delay = backoff.next_delay();
                        warn!(
                            adapter = %name,
                            error = %e,
                            "⚠️ Adapter failed, restarting in {:?}", delay
                        );
                        {
                            let mut map = health.write().await;
                            if let Some(entry) = map.get_mut(&name) {
                                entry.restarts += 1;
                            }
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }

            let mut map = health.write().await;
            if let Some(entry) = map.get_mut(&name) {
                entry.running = false;
            }
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Adapters currently considered live (not degraded).
    pub async fn active_adapters(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .health
            .read()
            .await
            .iter()
            .filter(|(_, h)| !h.degraded)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn health(&self) -> HashMap<String, AdapterHealth> {
        self.health.read().await.clone()
    }

    pub async fn is_fully_degraded(&self) -> bool {
        let map = self.health.read().await;
        !map.is_empty() && map.values().all(|h| h.degraded)
    }

    /// Resolves when the last live adapter degrades.
    pub async fn wait_all_degraded(&self) {
        loop {
            if self.is_fully_degraded().await {
                return;
            }
            self.all_degraded.notified().await;
        }
    }

    /// Cancel everything and wait for tasks to drain within the grace
    /// period; stragglers are aborted.
    pub async fn shutdown(&self) {
        info!("🛑 Shutdown: cancelling pipeline tasks...");
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(self.grace, &mut task).await.is_err() {
                warn!("⚠️ Task did not drain within grace period, aborting");
                task.abort();
            }
        }
        info!("✅ Pipeline drained");
    }
}
