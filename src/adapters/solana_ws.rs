//! Solana websocket adapter: `programSubscribe` on the SPL Token program,
//! deriving transfer events from token-account balance deltas. When no
//! signature is available the event carries a synthetic id of account
//! pubkey + slot, which still dedups consistently across reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{emit, AdapterStats, AdapterStatsSnapshot, ErrorLogGuard, SourceAdapter};
use crate::config::SolanaWsConfig;
use crate::error::{AppError, AppResult};
use crate::events::EventSender;
use crate::models::{RawEvent, SourceId};
use crate::prices::PriceOracle;
use crate::resilience::Backoff;

const SPL_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
const MAX_CONSECUTIVE_RETRIES: u32 = 5;

#[derive(Debug, Deserialize)]
struct ProgramNotification {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: NotificationResult,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    context: SlotContext,
    value: AccountKeyed,
}

#[derive(Debug, Deserialize)]
struct SlotContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct AccountKeyed {
    pubkey: String,
    account: AccountData,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    data: ParsedData,
}

#[derive(Debug, Deserialize)]
struct ParsedData {
    #[serde(default)]
    parsed: Option<ParsedAccount>,
}

#[derive(Debug, Deserialize)]
struct ParsedAccount {
    info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
struct TokenAccountInfo {
    mint: String,
    owner: String,
    #[serde(rename = "tokenAmount")]
    token_amount: TokenAmount,
}

#[derive(Debug, Deserialize)]
struct TokenAmount {
    #[serde(rename = "uiAmount")]
    ui_amount: Option<f64>,
}

pub struct SolanaWsAdapter {
    config: SolanaWsConfig,
    global_threshold: f64,
    prices: Arc<PriceOracle>,
    stats: Arc<AdapterStats>,
    log_guard: ErrorLogGuard,
}

impl SolanaWsAdapter {
    pub fn new(config: SolanaWsConfig, global_threshold: f64, prices: Arc<PriceOracle>) -> Self {
        Self {
            config,
            global_threshold,
            prices,
            stats: Arc::new(AdapterStats::default()),
            log_guard: ErrorLogGuard::new(),
        }
    }

    fn watched_symbol(&self, mint: &str) -> Option<&str> {
        self.config
            .mints
            .iter()
            .find(|m| m.mint == mint)
            .map(|m| m.symbol.as_str())
    }

    /// One websocket session: subscribe, then stream account updates until
    /// the connection drops or we are cancelled.
    async fn stream_session(
        &self,
        out: &EventSender,
        previous_balances: &mut HashMap<String, f64>,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let (ws_stream, _) = connect_async(&self.config.ws_url).await?;
        info!("✅ Solana websocket connected: {}", self.config.ws_url);
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "programSubscribe",
            "params": [
                SPL_TOKEN_PROGRAM,
                {"encoding": "jsonParsed", "commitment": "confirmed"}
            ]
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        self.stats.mark_success();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = self.handle_update(&text, previous_balances).await {
                                emit(out, event, &self.stats)?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(AppError::WebSocket("solana ws closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn handle_update(
        &self,
        text: &str,
        previous_balances: &mut HashMap<String, f64>,
    ) -> Option<RawEvent> {
        let notification: ProgramNotification = match serde_json::from_str(text) {
            Ok(n) => n,
            Err(e) => {
                let msg = format!("solana ws parse error: {}", e);
                if self.log_guard.first_occurrence(&msg) {
                    warn!("⚠️ {}", msg);
                }
                self.stats.record_error();
                return None;
            }
        };

        if notification.method.as_deref() != Some("programNotification") {
            return None;
        }
        let result = notification.params?.result;
        let parsed = result.value.account.data.parsed?;
        let info = parsed.info;

        let symbol = self.watched_symbol(&info.mint)?.to_string();
        let ui_amount = info.token_amount.ui_amount.unwrap_or(0.0);
        let account_key = result.value.pubkey.clone();

        let previous = previous_balances.insert(account_key.clone(), ui_amount);
        let Some(previous) = previous else {
            // First sighting of this token account only sets the baseline.
            return None;
        };

        let change = ui_amount - previous;
        if change == 0.0 {
            return None;
        }
        self.stats.record_fetched(1);

        let price = self.prices.usd_price(&symbol).await.unwrap_or(0.0);
        let usd_value = change.abs() * price;
        if price <= 0.0 || usd_value < self.global_threshold {
            self.stats.record_filtered();
            return None;
        }

        debug!(
            mint = %info.mint,
            owner = %info.owner,
            change,
            usd_value,
            "🐋 Solana balance change"
        );

        Some(RawEvent {
            source: SourceId::SolanaWs,
            blockchain: "solana".to_string(),
            tx_hash: format!("{}{}", account_key, result.context.slot),
            log_index: 0,
            sequence: 0,
            block_ref: Some(result.context.slot),
            // Balance deltas do not expose the counterparty.
            from_addr: if change < 0.0 { info.owner.clone() } else { "unknown".to_string() },
            to_addr: if change < 0.0 { "unknown".to_string() } else { info.owner.clone() },
            symbol,
            amount: change.abs(),
            usd_value,
            timestamp: chrono::Utc::now().timestamp(),
            raw: None,
        })
    }
}

#[async_trait]
impl SourceAdapter for SolanaWsAdapter {
    fn name(&self) -> &'static str {
        "solana_ws"
    }

    fn source_id(&self) -> SourceId {
        SourceId::SolanaWs
    }

    fn stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    async fn run(&self, out: EventSender, cancel: CancellationToken) -> AppResult<()> {
        let mut previous_balances: HashMap<String, f64> = HashMap::new();
        let mut backoff = Backoff::for_websocket();
        let mut consecutive_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.stream_session(&out, &mut previous_balances, &cancel).await {
                Ok(()) => break, // cancelled
                Err(AppError::ChannelClosed(msg)) => {
                    return Err(AppError::ChannelClosed(msg));
                }
                Err(e) => {
                    self.stats.record_error();
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_RETRIES {
                        warn!("❌ Solana websocket unhealthy after {} attempts", consecutive_failures);
                        return Err(e);
                    }
                    let delay = backoff.next_delay();
                    warn!(error = %e, "⚠️ Solana websocket lost, reconnecting in {:?}", delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Solana websocket adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchedMint;

    fn adapter() -> SolanaWsAdapter {
        let prices = Arc::new(PriceOracle::with_base_url("http://127.0.0.1:1".to_string()));
        SolanaWsAdapter::new(
            SolanaWsConfig {
                enabled: true,
                ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
                mints: vec![WatchedMint {
                    symbol: "SOL".to_string(),
                    mint: "So11111111111111111111111111111111111111112".to_string(),
                    decimals: 9,
                }],
            },
            2_500.0,
            prices,
        )
    }

    fn notification(pubkey: &str, slot: u64, ui_amount: f64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "programNotification",
            "params": {
                "result": {
                    "context": {"slot": slot},
                    "value": {
                        "pubkey": pubkey,
                        "account": {
                            "data": {
                                "parsed": {
                                    "info": {
                                        "mint": "So11111111111111111111111111111111111111112",
                                        "owner": "ownerPubkey111",
                                        "tokenAmount": {"uiAmount": ui_amount}
                                    }
                                }
                            },
                            "lamports": 2039280u64
                        }
                    }
                },
                "subscription": 42
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_first_update_sets_baseline_only() {
        let adapter = adapter();
        adapter.prices.prime(&[("SOL", 150.0)]).await;
        let mut balances = HashMap::new();

        let event = adapter
            .handle_update(&notification("acct1", 100, 1_000.0), &mut balances)
            .await;
        assert!(event.is_none());
        assert_eq!(balances["acct1"], 1_000.0);
    }

    #[tokio::test]
    async fn test_balance_increase_emits_inflow() {
        let adapter = adapter();
        adapter.prices.prime(&[("SOL", 150.0)]).await;
        let mut balances = HashMap::new();

        adapter
            .handle_update(&notification("acct1", 100, 1_000.0), &mut balances)
            .await;
        let event = adapter
            .handle_update(&notification("acct1", 101, 1_100.0), &mut balances)
            .await
            .expect("100 SOL change at $150 clears the threshold");

        assert_eq!(event.blockchain, "solana");
        assert_eq!(event.amount, 100.0);
        assert_eq!(event.usd_value, 15_000.0);
        assert_eq!(event.to_addr, "ownerPubkey111");
        assert_eq!(event.tx_hash, "acct1101");
        assert_eq!(event.block_ref, Some(101));
    }

    #[tokio::test]
    async fn test_small_change_is_filtered() {
        let adapter = adapter();
        adapter.prices.prime(&[("SOL", 150.0)]).await;
        let mut balances = HashMap::new();

        adapter
            .handle_update(&notification("acct1", 100, 1_000.0), &mut balances)
            .await;
        let event = adapter
            .handle_update(&notification("acct1", 101, 1_000.1), &mut balances)
            .await;
        assert!(event.is_none());
        assert_eq!(adapter.stats().filtered_low_value, 1);
    }

    #[tokio::test]
    async fn test_unwatched_mint_is_ignored() {
        let adapter = adapter();
        let mut balances = HashMap::new();
        let text = notification("acct1", 100, 1_000.0)
            .replace("So11111111111111111111111111111111111111112", "UnknownMint111");
        assert!(adapter.handle_update(&text, &mut balances).await.is_none());
        assert!(balances.is_empty());
    }

    #[tokio::test]
    async fn test_outflow_direction() {
        let adapter = adapter();
        adapter.prices.prime(&[("SOL", 150.0)]).await;
        let mut balances = HashMap::new();

        adapter
            .handle_update(&notification("acct1", 100, 1_000.0), &mut balances)
            .await;
        let event = adapter
            .handle_update(&notification("acct1", 101, 900.0), &mut balances)
            .await
            .unwrap();
        assert_eq!(event.from_addr, "ownerPubkey111");
        assert_eq!(event.to_addr, "unknown");
    }
}
