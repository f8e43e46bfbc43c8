use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::models::SentimentSnapshot;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SentimentQuery {
    pub hours: Option<u64>,
}

/// `GET /api/sentiment?hours=` — rolling sentiment snapshots. The default
/// window is served straight from the aggregator's latest published set;
/// a custom window is computed on demand over the store.
pub async fn get_sentiment(
    State(state): State<AppState>,
    Query(query): Query<SentimentQuery>,
) -> Json<Vec<SentimentSnapshot>> {
    let hours = query.hours.unwrap_or(state.config.sentiment_window_hours);
    if hours == state.config.sentiment_window_hours {
        return Json(state.aggregator.latest().await.as_ref().clone());
    }
    Json(state.aggregator.compute(hours * 3600).await)
}

/// `GET /api/sentiment/bullish` — top tokens by buy percentage.
pub async fn get_bullish(State(state): State<AppState>) -> Json<Vec<SentimentSnapshot>> {
    Json(state.aggregator.bullish().await)
}

/// `GET /api/sentiment/bearish` — top tokens by sell percentage.
pub async fn get_bearish(State(state): State<AppState>) -> Json<Vec<SentimentSnapshot>> {
    Json(state.aggregator.bearish().await)
}
