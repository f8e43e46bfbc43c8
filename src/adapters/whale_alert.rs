//! Vendor whale-alert websocket adapter. One alert may carry several token
//! amounts; each becomes its own event sharing the alert's transaction
//! hash, so dedup collapses them against the native adapters naturally.
//! Stablecoin amounts are skipped outright: USDT/USDC legs carry no
//! directional meaning and would flood the pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{emit, normalize_chain, AdapterStats, AdapterStatsSnapshot, ErrorLogGuard, SourceAdapter};
use crate::config::WhaleAlertConfig;
use crate::error::{AppError, AppResult};
use crate::events::EventSender;
use crate::models::{RawEvent, SourceId};
use crate::resilience::Backoff;

const RATE_LIMIT_PAUSE: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct Alert {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    blockchain: String,
    #[serde(default)]
    amounts: Vec<AlertAmount>,
    #[serde(default)]
    from: Option<AlertParty>,
    #[serde(default)]
    to: Option<AlertParty>,
    #[serde(default)]
    transaction: Option<AlertTransaction>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AlertAmount {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    value_usd: f64,
}

#[derive(Debug, Deserialize)]
struct AlertParty {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct AlertTransaction {
    #[serde(default)]
    hash: String,
}

pub struct WhaleAlertAdapter {
    config: WhaleAlertConfig,
    global_threshold: f64,
    stablecoins: HashSet<String>,
    stats: Arc<AdapterStats>,
    log_guard: ErrorLogGuard,
}

impl WhaleAlertAdapter {
    pub fn new(config: WhaleAlertConfig, global_threshold: f64, stablecoins: HashSet<String>) -> Self {
        Self {
            config,
            global_threshold,
            stablecoins,
            stats: Arc::new(AdapterStats::default()),
            log_guard: ErrorLogGuard::new(),
        }
    }

    fn subscription_request(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "subscribe_alerts",
            "min_value_usd": self.global_threshold,
            "tx_types": ["transfer", "mint", "burn"],
            "blockchain": self.config.blockchains,
        })
    }

    async fn stream_session(
        &self,
        out: &EventSender,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let url = format!(
            "{}?api_key={}",
            self.config.ws_url,
            self.config.api_key.as_deref().unwrap_or_default()
        );
        let (ws_stream, _) = connect_async(&url).await?;
        info!("✅ Whale-alert feed connected");
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(self.subscription_request().to_string()))
            .await?;
        self.stats.mark_success();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            for event in self.handle_alert(&text) {
                                emit(out, event, &self.stats)?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let detail = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            if detail.to_lowercase().contains("rate limit") {
                                return Err(AppError::RateLimited(detail));
                            }
                            return Err(AppError::WebSocket("whale-alert ws closed".to_string()));
                        }
                        None => return Err(AppError::WebSocket("whale-alert ws closed".to_string())),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn handle_alert(&self, text: &str) -> Vec<RawEvent> {
        let alert: Alert = match serde_json::from_str(text) {
            Ok(a) => a,
            Err(e) => {
                let msg = format!("whale-alert parse error: {}", e);
                if self.log_guard.first_occurrence(&msg) {
                    warn!("⚠️ {}", msg);
                }
                self.stats.record_error();
                return Vec::new();
            }
        };

        if alert.kind != "alert" {
            return Vec::new();
        }
        let tx_hash = alert
            .transaction
            .as_ref()
            .map(|t| t.hash.clone())
            .unwrap_or_default();
        if tx_hash.is_empty() {
            return Vec::new();
        }

        let blockchain = normalize_chain(&alert.blockchain);
        let evm_chain = matches!(blockchain.as_str(), "ethereum" | "polygon" | "bsc");
        let lowercase_if_evm = |addr: &str| {
            if evm_chain {
                addr.to_lowercase()
            } else {
                addr.to_string()
            }
        };

        let from_addr = alert
            .from
            .as_ref()
            .map(|p| lowercase_if_evm(&p.address))
            .unwrap_or_default();
        let to_addr = alert
            .to
            .as_ref()
            .map(|p| lowercase_if_evm(&p.address))
            .unwrap_or_default();
        let timestamp = alert
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        let mut events = Vec::new();
        for amount in &alert.amounts {
            let symbol = amount.symbol.to_uppercase();
            if self.stablecoins.contains(&symbol) {
                debug!("Skipping stablecoin leg {} in alert {}", symbol, tx_hash);
                continue;
            }
            self.stats.record_fetched(1);

            if amount.amount <= 0.0 || amount.value_usd < self.global_threshold {
                self.stats.record_filtered();
                continue;
            }

            events.push(RawEvent {
                source: SourceId::WhaleAlertWs,
                blockchain: blockchain.clone(),
                tx_hash: if evm_chain { tx_hash.to_lowercase() } else { tx_hash.clone() },
                log_index: 0,
                sequence: 0,
                block_ref: None,
                from_addr: from_addr.clone(),
                to_addr: to_addr.clone(),
                symbol,
                amount: amount.amount,
                usd_value: amount.value_usd,
                timestamp,
                raw: None,
            });
        }

        events
    }
}

#[async_trait]
impl SourceAdapter for WhaleAlertAdapter {
    fn name(&self) -> &'static str {
        "whale_alert_ws"
    }

    fn source_id(&self) -> SourceId {
        SourceId::WhaleAlertWs
    }

    fn stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    async fn run(&self, out: EventSender, cancel: CancellationToken) -> AppResult<()> {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(120));

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.stream_session(&out, &cancel).await {
                Ok(()) => break, // cancelled
                Err(AppError::ChannelClosed(msg)) => {
                    return Err(AppError::ChannelClosed(msg));
                }
                Err(AppError::RateLimited(detail)) => {
                    self.stats.record_error();
                    warn!("⚠️ Whale-alert rate limited ({}), pausing {:?}", detail, RATE_LIMIT_PAUSE);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RATE_LIMIT_PAUSE) => {}
                    }
                }
                Err(e) => {
                    self.stats.record_error();
                    let delay = backoff.next_delay();
                    warn!(error = %e, "⚠️ Whale-alert feed lost, reconnecting in {:?}", delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Whale-alert adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> WhaleAlertAdapter {
        WhaleAlertAdapter::new(
            WhaleAlertConfig {
                enabled: true,
                ws_url: "wss://leviathan.whale-alert.io/ws".to_string(),
                api_key: Some("key".to_string()),
                blockchains: vec!["ethereum".to_string(), "ripple".to_string()],
            },
            2_500.0,
            ["USDT", "USDC", "DAI"].iter().map(|s| s.to_string()).collect(),
        )
    }

    fn alert_json() -> String {
        serde_json::json!({
            "type": "alert",
            "blockchain": "ethereum",
            "transaction_type": "transfer",
            "amounts": [
                {"symbol": "ETH", "amount": 1000.0, "value_usd": 3000000.0},
                {"symbol": "USDT", "amount": 3000000.0, "value_usd": 3000000.0},
                {"symbol": "PEPE", "amount": 50.0, "value_usd": 100.0}
            ],
            "from": {"address": "0xAAAA567890123456789012345678901234567890", "owner": "binance"},
            "to": {"address": "0xBBBB567890123456789012345678901234567890"},
            "transaction": {"hash": "0xDEF123"},
            "timestamp": 1700000000i64
        })
        .to_string()
    }

    #[test]
    fn test_alert_fans_out_per_amount_skipping_stablecoins() {
        let adapter = adapter();
        let events = adapter.handle_alert(&alert_json());

        // USDT skipped (stablecoin), PEPE filtered ($100 < threshold).
        assert_eq!(events.len(), 1);
        let eth = &events[0];
        assert_eq!(eth.symbol, "ETH");
        assert_eq!(eth.tx_hash, "0xdef123");
        assert_eq!(eth.from_addr, "0xaaaa567890123456789012345678901234567890");
        assert_eq!(eth.usd_value, 3_000_000.0);
        assert_eq!(adapter.stats().filtered_low_value, 1);
    }

    #[test]
    fn test_ripple_alerts_normalize_to_xrp() {
        let adapter = adapter();
        let text = serde_json::json!({
            "type": "alert",
            "blockchain": "ripple",
            "amounts": [{"symbol": "XRP", "amount": 10000.0, "value_usd": 5000.0}],
            "from": {"address": "rSender"},
            "to": {"address": "rReceiver"},
            "transaction": {"hash": "ABCD"},
            "timestamp": 1700000000i64
        })
        .to_string();

        let events = adapter.handle_alert(&text);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].blockchain, "xrp");
        // Non-EVM hash keeps its case.
        assert_eq!(events[0].tx_hash, "ABCD");
    }

    #[test]
    fn test_non_alert_messages_ignored() {
        let adapter = adapter();
        assert!(adapter.handle_alert(r#"{"type":"subscribed_alerts"}"#).is_empty());
        assert!(adapter.handle_alert("not json").is_empty());
    }

    #[test]
    fn test_alert_without_hash_dropped() {
        let adapter = adapter();
        let text = serde_json::json!({
            "type": "alert",
            "blockchain": "ethereum",
            "amounts": [{"symbol": "ETH", "amount": 10.0, "value_usd": 30000.0}]
        })
        .to_string();
        assert!(adapter.handle_alert(&text).is_empty());
    }

    #[test]
    fn test_subscription_request_shape() {
        let adapter = adapter();
        let req = adapter.subscription_request();
        assert_eq!(req["type"], "subscribe_alerts");
        assert_eq!(req["min_value_usd"], 2_500.0);
        assert_eq!(req["tx_types"][0], "transfer");
    }
}
