//! Signature-based Solana poller, the fallback for the websocket adapter.
//! Walks `getSignaturesForAddress` per watched mint, fetches parsed
//! transactions, and emits one event per matching SPL transfer
//! instruction (top-level and inner).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{emit, AdapterStats, AdapterStatsSnapshot, ErrorLogGuard, MinIntervalLimiter, SourceAdapter};
use crate::config::{SolanaPollConfig, WatchedMint};
use crate::error::{AppError, AppResult};
use crate::events::EventSender;
use crate::models::{RawEvent, SourceId};
use crate::prices::PriceOracle;
use crate::resilience::Backoff;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const RPC_MIN_INTERVAL: Duration = Duration::from_millis(200);
const SIGNATURE_BATCH: usize = 100;
// Parsed-transaction cache bound; old signatures age out FIFO.
const PARSED_CACHE_MAX: usize = 2_000;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SignatureInfo {
    signature: String,
    slot: u64,
    #[serde(rename = "blockTime")]
    block_time: Option<i64>,
    #[serde(default)]
    err: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct SplTransfer {
    mint: Option<String>,
    source: String,
    destination: String,
    ui_amount: f64,
}

pub struct SolanaPollAdapter {
    config: SolanaPollConfig,
    global_threshold: f64,
    prices: Arc<PriceOracle>,
    client: reqwest::Client,
    limiter: MinIntervalLimiter,
    stats: Arc<AdapterStats>,
    log_guard: ErrorLogGuard,
}

impl SolanaPollAdapter {
    pub fn new(config: SolanaPollConfig, global_threshold: f64, prices: Arc<PriceOracle>) -> Self {
        Self {
            config,
            global_threshold,
            prices,
            client: reqwest::Client::new(),
            limiter: MinIntervalLimiter::new(RPC_MIN_INTERVAL),
            stats: Arc::new(AdapterStats::default()),
            log_guard: ErrorLogGuard::new(),
        }
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AppResult<T> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.config.rpc_url)
            .timeout(RPC_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited("solana rpc".to_string()));
        }

        let body: RpcResponse<T> = response.json().await?;
        if let Some(error) = body.error {
            return Err(AppError::ExternalApi(format!(
                "solana rpc {}: {} ({})",
                method, error.message, error.code
            )));
        }
        body.result
            .ok_or_else(|| AppError::ExternalApi(format!("solana rpc {}: empty result", method)))
    }

    async fn signatures_for(&self, mint: &str) -> AppResult<Vec<SignatureInfo>> {
        self.rpc_call(
            "getSignaturesForAddress",
            serde_json::json!([mint, {"limit": SIGNATURE_BATCH}]),
        )
        .await
    }

    async fn fetch_transaction(&self, signature: &str) -> AppResult<serde_json::Value> {
        self.rpc_call(
            "getTransaction",
            serde_json::json!([
                signature,
                {"encoding": "jsonParsed", "maxSupportedTransactionVersion": 0}
            ]),
        )
        .await
    }

    /// Pull SPL transfer instructions (top-level and inner) out of a
    /// parsed transaction.
    fn extract_transfers(transaction: &serde_json::Value) -> Vec<SplTransfer> {
        let mut transfers = Vec::new();

        let top_level = transaction
            .pointer("/transaction/message/instructions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let inner: Vec<serde_json::Value> = transaction
            .pointer("/meta/innerInstructions")
            .and_then(|v| v.as_array())
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|g| g.get("instructions").and_then(|v| v.as_array()))
                    .flatten()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for instruction in top_level.iter().chain(inner.iter()) {
            if instruction.get("program").and_then(|v| v.as_str()) != Some("spl-token") {
                continue;
            }
            let Some(parsed) = instruction.get("parsed") else { continue };
            let kind = parsed.get("type").and_then(|v| v.as_str()).unwrap_or_default();
            if kind != "transfer" && kind != "transferChecked" {
                continue;
            }
            let Some(info) = parsed.get("info") else { continue };

            let ui_amount = info
                .pointer("/tokenAmount/uiAmount")
                .and_then(|v| v.as_f64())
                .or_else(|| {
                    info.get("amount")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse::<f64>().ok())
                });

            transfers.push(SplTransfer {
                mint: info.get("mint").and_then(|v| v.as_str()).map(String::from),
                source: info
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                destination: info
                    .get("destination")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                ui_amount: ui_amount.unwrap_or(0.0),
            });
        }

        transfers
    }

    async fn poll_mint(
        &self,
        mint: &WatchedMint,
        cursors: &mut HashMap<String, String>,
        parsed_cache: &mut ParsedCache,
    ) -> AppResult<Vec<RawEvent>> {
        let price = match self.prices.usd_price(&mint.symbol).await {
            Some(p) if p > 0.0 => p,
            _ => return Ok(Vec::new()),
        };

        let signatures = self.signatures_for(&mint.mint).await?;
        if signatures.is_empty() {
            return Ok(Vec::new());
        }

        // Baseline initialization: remember the newest signature without
        // emitting, so historical backfill is skipped.
        let Some(cursor) = cursors.get(&mint.mint).cloned() else {
            cursors.insert(mint.mint.clone(), signatures[0].signature.clone());
            debug!("solana {} baseline at {}", mint.symbol, &signatures[0].signature[..16.min(signatures[0].signature.len())]);
            return Ok(Vec::new());
        };

        let fresh: Vec<&SignatureInfo> = signatures
            .iter()
            .take_while(|s| s.signature != cursor)
            .filter(|s| s.err.is_none())
            .collect();

        let mut events = Vec::new();
        for sig_info in fresh.iter().rev() {
            if bs58::decode(&sig_info.signature).into_vec().is_err() {
                let msg = format!("solana: non-base58 signature {}", sig_info.signature);
                if self.log_guard.first_occurrence(&msg) {
                    warn!("⚠️ {}", msg);
                }
                continue;
            }
            if parsed_cache.contains(&sig_info.signature) {
                continue;
            }

            self.limiter.acquire().await;
            let transaction = match self.fetch_transaction(&sig_info.signature).await {
                Ok(tx) => tx,
                Err(e) => {
                    self.stats.record_error();
                    warn!(signature = %sig_info.signature, error = %e, "⚠️ getTransaction failed");
                    continue;
                }
            };
            parsed_cache.insert(sig_info.signature.clone());

            for transfer in Self::extract_transfers(&transaction) {
                if transfer.mint.as_deref() != Some(mint.mint.as_str()) {
                    continue;
                }
                self.stats.record_fetched(1);

                let usd_value = transfer.ui_amount * price;
                if usd_value < self.global_threshold {
                    self.stats.record_filtered();
                    continue;
                }

                events.push(RawEvent {
                    source: SourceId::SolanaPoll,
                    blockchain: "solana".to_string(),
                    tx_hash: sig_info.signature.clone(),
                    log_index: 0,
                    sequence: 0,
                    block_ref: Some(sig_info.slot),
                    from_addr: transfer.source,
                    to_addr: transfer.destination,
                    symbol: mint.symbol.clone(),
                    amount: transfer.ui_amount,
                    usd_value,
                    timestamp: sig_info
                        .block_time
                        .unwrap_or_else(|| chrono::Utc::now().timestamp()),
                    raw: None,
                });
            }
        }

        cursors.insert(mint.mint.clone(), signatures[0].signature.clone());
        Ok(events)
    }
}

/// FIFO-bounded set of already-parsed signatures so overlapping signature
/// pages never trigger duplicate `getTransaction` fetches.
struct ParsedCache {
    seen: HashSet<String>,
    order: std::collections::VecDeque<String>,
}

impl ParsedCache {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            order: std::collections::VecDeque::new(),
        }
    }

    fn contains(&self, signature: &str) -> bool {
        self.seen.contains(signature)
    }

    fn insert(&mut self, signature: String) {
        if self.seen.insert(signature.clone()) {
            self.order.push_back(signature);
            while self.order.len() > PARSED_CACHE_MAX {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for SolanaPollAdapter {
    fn name(&self) -> &'static str {
        "solana_poll"
    }

    fn source_id(&self) -> SourceId {
        SourceId::SolanaPoll
    }

    fn stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    async fn run(&self, out: EventSender, cancel: CancellationToken) -> AppResult<()> {
        info!(
            "📡 Solana poller started ({} watched mints, every {}s)",
            self.config.mints.len(),
            self.config.poll_interval_secs
        );

        let mut cursors: HashMap<String, String> = HashMap::new();
        let mut parsed_cache = ParsedCache::new();
        let mut backoff = Backoff::for_polling();
        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for mint in &self.config.mints {
                if cancel.is_cancelled() {
                    break;
                }
                self.limiter.acquire().await;

                match self.poll_mint(mint, &mut cursors, &mut parsed_cache).await {
                    Ok(events) => {
                        backoff.reset();
                        self.stats.mark_success();
                        for event in events {
                            emit(&out, event, &self.stats)?;
                        }
                    }
                    Err(e) => {
                        self.stats.record_error();
                        let delay = backoff.next_delay();
                        warn!(
                            mint = %mint.symbol,
                            error = %e,
                            "⚠️ Solana poll error, backing off {:?}", delay
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        info!("Solana poller stopped");
        Ok(())
    }
}
