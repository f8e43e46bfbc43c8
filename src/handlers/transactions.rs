use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{Classification, ClassifiedEvent};
use crate::server::AppState;
use crate::store::EventFilter;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub min_value: Option<f64>,
    pub blockchain: Option<String>,
    pub symbol: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
    pub limit: Option<usize>,
}

fn parse_classification(raw: &str) -> AppResult<Classification> {
    match raw.to_lowercase().as_str() {
        "buy" => Ok(Classification::Buy),
        "sell" => Ok(Classification::Sell),
        "transfer" => Ok(Classification::Transfer),
        other => Err(AppError::BadRequest(format!(
            "unknown type '{}' (expected buy, sell, or transfer)",
            other
        ))),
    }
}

/// `GET /api/transactions` — recent classified events, filters ANDed,
/// newest first.
pub async fn get_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> AppResult<Json<Vec<ClassifiedEvent>>> {
    let classification = query
        .tx_type
        .as_deref()
        .map(parse_classification)
        .transpose()?;

    let filter = EventFilter {
        min_value: Some(query.min_value.unwrap_or(state.config.global_usd_threshold)),
        blockchain: query.blockchain,
        symbol: query.symbol,
        classification,
        since_ts: None,
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
    };

    Ok(Json(state.store.recent_by_filter(&filter).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classification() {
        assert_eq!(parse_classification("buy").unwrap(), Classification::Buy);
        assert_eq!(parse_classification("SELL").unwrap(), Classification::Sell);
        assert_eq!(parse_classification("Transfer").unwrap(), Classification::Transfer);
        assert!(parse_classification("mint").is_err());
    }

    #[test]
    fn test_query_deserializes_type_alias() {
        let query: TransactionsQuery =
            serde_urlencoded_like("min_value=5000&type=buy&limit=10");
        assert_eq!(query.min_value, Some(5_000.0));
        assert_eq!(query.tx_type.as_deref(), Some("buy"));
        assert_eq!(query.limit, Some(10));
    }

    // Minimal query-string decode via serde_json to avoid an extra dev
    // dependency; axum performs the real decoding in production.
    fn serde_urlencoded_like(qs: &str) -> TransactionsQuery {
        let mut map = serde_json::Map::new();
        for pair in qs.split('&') {
            let mut kv = pair.splitn(2, '=');
            let key = kv.next().unwrap_or_default().to_string();
            let value = kv.next().unwrap_or_default();
            let json_value = if let Ok(n) = value.parse::<i64>() {
                serde_json::json!(n)
            } else if let Ok(n) = value.parse::<f64>() {
                serde_json::json!(n)
            } else {
                serde_json::json!(value)
            };
            map.insert(key, json_value);
        }
        serde_json::from_value(serde_json::Value::Object(map)).unwrap()
    }
}
