//! XRP Ledger websocket adapter: subscribes to the global `transactions`
//! stream and emits Payment events, with failover across multiple server
//! URLs.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{emit, AdapterStats, AdapterStatsSnapshot, ErrorLogGuard, SourceAdapter};
use crate::config::XrpConfig;
use crate::error::{AppError, AppResult};
use crate::events::EventSender;
use crate::models::{RawEvent, SourceId};
use crate::prices::PriceOracle;
use crate::resilience::Backoff;

const DROPS_PER_XRP: f64 = 1_000_000.0;

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    transaction: Option<XrpTransaction>,
}

#[derive(Debug, Deserialize)]
struct XrpTransaction {
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Account", default)]
    account: String,
    #[serde(rename = "Destination", default)]
    destination: String,
    // Native payments carry drops as a string; issued-currency payments
    // carry an object and are not XRP movements.
    #[serde(rename = "Amount", default)]
    amount: Option<serde_json::Value>,
    #[serde(rename = "Sequence", default)]
    sequence: u64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    date: Option<i64>,
}

pub struct XrpWsAdapter {
    config: XrpConfig,
    global_threshold: f64,
    prices: Arc<PriceOracle>,
    stats: Arc<AdapterStats>,
    log_guard: ErrorLogGuard,
}

impl XrpWsAdapter {
    pub fn new(config: XrpConfig, global_threshold: f64, prices: Arc<PriceOracle>) -> Self {
        Self {
            config,
            global_threshold,
            prices,
            stats: Arc::new(AdapterStats::default()),
            log_guard: ErrorLogGuard::new(),
        }
    }

    async fn stream_session(
        &self,
        url: &str,
        out: &EventSender,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("✅ XRP websocket connected: {}", url);
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "id": "whale_monitor",
            "command": "subscribe",
            "streams": ["transactions"]
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        self.stats.mark_success();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = self.handle_message(&text).await {
                                emit(out, event, &self.stats)?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(AppError::WebSocket("xrp ws closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn handle_message(&self, text: &str) -> Option<RawEvent> {
        let message: StreamMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                let msg = format!("xrp ws parse error: {}", e);
                if self.log_guard.first_occurrence(&msg) {
                    warn!("⚠️ {}", msg);
                }
                self.stats.record_error();
                return None;
            }
        };

        let txn = message.transaction?;
        if txn.transaction_type != "Payment" || txn.hash.is_empty() {
            return None;
        }

        // Issued-currency amounts arrive as objects; only drop-denominated
        // strings are native XRP.
        let drops: f64 = match txn.amount.as_ref().and_then(|a| a.as_str()) {
            Some(s) => s.trim().parse().ok()?,
            None => return None,
        };
        let amount_xrp = drops / DROPS_PER_XRP;
        self.stats.record_fetched(1);

        let price = self.prices.usd_price("XRP").await.unwrap_or(0.0);
        let usd_value = amount_xrp * price;
        if price <= 0.0 || usd_value < self.global_threshold {
            self.stats.record_filtered();
            return None;
        }

        debug!(
            hash = %txn.hash,
            amount_xrp,
            usd_value,
            "🐋 XRP payment"
        );

        Some(RawEvent {
            source: SourceId::XrpWs,
            blockchain: "xrp".to_string(),
            tx_hash: txn.hash,
            log_index: 0,
            sequence: txn.sequence,
            block_ref: None,
            from_addr: txn.account,
            to_addr: txn.destination,
            symbol: "XRP".to_string(),
            amount: amount_xrp,
            usd_value,
            timestamp: txn
                .date
                // Ripple epoch (2000-01-01) to unix.
                .map(|d| d + 946_684_800)
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            raw: None,
        })
    }
}

#[async_trait]
impl SourceAdapter for XrpWsAdapter {
    fn name(&self) -> &'static str {
        "xrp_ws"
    }

    fn source_id(&self) -> SourceId {
        SourceId::XrpWs
    }

    fn stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    async fn run(&self, out: EventSender, cancel: CancellationToken) -> AppResult<()> {
        let mut backoff = Backoff::for_websocket();
        let mut url_index = 0usize;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let url = &self.config.ws_urls[url_index % self.config.ws_urls.len()];

            match self.stream_session(url, &out, &cancel).await {
                Ok(()) => break, // cancelled
                Err(AppError::ChannelClosed(msg)) => {
                    return Err(AppError::ChannelClosed(msg));
                }
                Err(e) => {
                    self.stats.record_error();
                    // Fail over to the next server before backing off.
                    url_index += 1;
                    let delay = backoff.next_delay();
                    warn!(url = %url, error = %e, "⚠️ XRP websocket lost, next server in {:?}", delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("XRP websocket adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> XrpWsAdapter {
        let prices = Arc::new(PriceOracle::with_base_url("http://127.0.0.1:1".to_string()));
        XrpWsAdapter::new(
            XrpConfig {
                enabled: true,
                ws_urls: vec!["wss://s1.ripple.com".to_string()],
            },
            2_500.0,
            prices,
        )
    }

    fn payment(drops: &str) -> String {
        serde_json::json!({
            "type": "transaction",
            "transaction": {
                "TransactionType": "Payment",
                "Account": "rSenderAddress111",
                "Destination": "rReceiverAddress1",
                "Amount": drops,
                "Sequence": 77,
                "hash": "ABCDEF0123456789",
                "date": 761000000i64
            },
            "validated": true
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_payment_over_threshold_emits() {
        let adapter = adapter();
        adapter.prices.prime(&[("XRP", 0.5)]).await;

        // 10,000 XRP at $0.50 = $5,000.
        let event = adapter
            .handle_message(&payment("10000000000"))
            .await
            .unwrap();
        assert_eq!(event.blockchain, "xrp");
        assert_eq!(event.symbol, "XRP");
        assert_eq!(event.amount, 10_000.0);
        assert_eq!(event.usd_value, 5_000.0);
        assert_eq!(event.sequence, 77);
        assert_eq!(event.from_addr, "rSenderAddress111");
        // Ripple epoch offset applied.
        assert_eq!(event.timestamp, 761_000_000 + 946_684_800);
    }

    #[tokio::test]
    async fn test_small_payment_filtered() {
        let adapter = adapter();
        adapter.prices.prime(&[("XRP", 0.5)]).await;

        // 100 XRP = $50.
        assert!(adapter.handle_message(&payment("100000000")).await.is_none());
        assert_eq!(adapter.stats().filtered_low_value, 1);
    }

    #[tokio::test]
    async fn test_issued_currency_payment_ignored() {
        let adapter = adapter();
        let text = serde_json::json!({
            "transaction": {
                "TransactionType": "Payment",
                "Account": "rSender",
                "Destination": "rReceiver",
                "Amount": {"currency": "USD", "issuer": "rIssuer", "value": "100"},
                "Sequence": 1,
                "hash": "FFFF"
            }
        })
        .to_string();
        assert!(adapter.handle_message(&text).await.is_none());
    }

    #[tokio::test]
    async fn test_non_payment_ignored() {
        let adapter = adapter();
        let text = serde_json::json!({
            "transaction": {
                "TransactionType": "OfferCreate",
                "Account": "rSender",
                "Sequence": 1,
                "hash": "EEEE"
            }
        })
        .to_string();
        assert!(adapter.handle_message(&text).await.is_none());
    }
}
