use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::adapters::AdapterStatsSnapshot;
use crate::models::TokenCounter;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct TokenStats {
    pub symbol: String,
    pub buys: u64,
    pub sells: u64,
    pub total: u64,
    pub buy_percentage: f64,
    pub trend: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DedupBlock {
    pub total_transactions: u64,
    pub unique_transactions: u64,
    pub duplicates_caught: u64,
    pub dedup_ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct MonitoringBlock {
    pub active_adapters: Vec<String>,
    pub min_transaction_value: f64,
    pub adapters: HashMap<String, AdapterStatsSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub tokens: Vec<TokenStats>,
    pub deduplication: DedupBlock,
    pub monitoring: MonitoringBlock,
}

fn trend_for(buy_percentage: f64, total: u64) -> &'static str {
    if total == 0 {
        return "neutral";
    }
    if buy_percentage > 60.0 {
        "bullish"
    } else if buy_percentage < 40.0 {
        "bearish"
    } else {
        "neutral"
    }
}

pub(crate) fn token_stats_from_counters(counters: &HashMap<String, TokenCounter>) -> Vec<TokenStats> {
    let mut tokens: Vec<TokenStats> = counters
        .iter()
        .map(|(symbol, counter)| {
            let total = counter.total_directional();
            let buy_percentage = (counter.buy_percentage() * 10.0).round() / 10.0;
            TokenStats {
                symbol: symbol.clone(),
                buys: counter.buys,
                sells: counter.sells,
                total,
                buy_percentage,
                trend: trend_for(buy_percentage, total),
            }
        })
        .collect();
    tokens.sort_by(|a, b| b.total.cmp(&a.total));
    tokens
}

/// `GET /api/stats` — token counters, dedup stats, monitoring state.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let counters = state.store.token_counters().await;
    let dedup = state.dedup_stats.read().await.clone();

    let mut adapter_stats = HashMap::new();
    for adapter in &state.adapters {
        adapter_stats.insert(adapter.name().to_string(), adapter.stats());
    }

    Json(StatsResponse {
        tokens: token_stats_from_counters(&counters),
        deduplication: DedupBlock {
            total_transactions: dedup.total_received,
            unique_transactions: dedup.unique_transactions,
            duplicates_caught: dedup.duplicates_caught,
            dedup_ratio: (dedup.dedup_ratio() * 100.0).round() / 100.0,
        },
        monitoring: MonitoringBlock {
            active_adapters: state.supervisor.active_adapters().await,
            min_transaction_value: state.config.global_usd_threshold,
            adapters: adapter_stats,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(buys: u64, sells: u64) -> TokenCounter {
        TokenCounter {
            buys,
            sells,
            ..Default::default()
        }
    }

    #[test]
    fn test_trend_bands() {
        assert_eq!(trend_for(70.0, 10), "bullish");
        assert_eq!(trend_for(30.0, 10), "bearish");
        assert_eq!(trend_for(50.0, 10), "neutral");
        assert_eq!(trend_for(0.0, 0), "neutral");
    }

    #[test]
    fn test_token_stats_sorted_by_activity() {
        let mut counters = HashMap::new();
        counters.insert("QUIET".to_string(), counter(1, 0));
        counters.insert("BUSY".to_string(), counter(8, 4));

        let tokens = token_stats_from_counters(&counters);
        assert_eq!(tokens[0].symbol, "BUSY");
        assert_eq!(tokens[0].total, 12);
        assert!((tokens[0].buy_percentage - 66.7).abs() < 0.01);
        assert_eq!(tokens[0].trend, "bullish");
        assert_eq!(tokens[1].symbol, "QUIET");
    }
}
