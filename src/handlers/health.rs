use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::server::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "uptime_seconds": uptime,
        "events_stored": state.store.len().await,
    }))
}
