//! External enrichment clients for the expensive phases: portfolio lookup
//! (P7) and the analytic-warehouse historical query (P8). Both are
//! best-effort; a timeout or error skips the phase, never the event.

use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::error::{AppError, AppResult};

const PORTFOLIO_TIMEOUT: Duration = Duration::from_secs(20);
const WAREHOUSE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EnrichmentClient {
    client: reqwest::Client,
    config: EnrichmentConfig,
}

impl EnrichmentClient {
    pub fn new(config: EnrichmentConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    /// Total portfolio value for an address, if the provider knows it.
    pub async fn portfolio_value_usd(&self, address: &str) -> AppResult<Option<f64>> {
        let url = format!(
            "{}/wallets/{}/portfolio",
            self.config.portfolio_api_url.trim_end_matches('/'),
            address
        );
        let mut request = self.client.get(&url).timeout(PORTFOLIO_TIMEOUT);
        if let Some(key) = &self.config.portfolio_api_key {
            request = request.header("Authorization", format!("Basic {}", key));
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited("portfolio API".to_string()));
        }
        if !response.status().is_success() {
            return Err(AppError::ExternalApi(format!(
                "portfolio API returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body
            .pointer("/data/attributes/total/positions")
            .or_else(|| body.pointer("/total_value_usd"))
            .and_then(|v| v.as_f64()))
    }

    /// 30-day transfer volume for an address from the analytic warehouse.
    pub async fn historical_volume_usd(&self, chain: &str, address: &str) -> AppResult<Option<f64>> {
        if self.config.warehouse_url.is_empty() {
            return Ok(None);
        }
        let url = format!(
            "{}/address-activity?chain={}&address={}&window=30d",
            self.config.warehouse_url.trim_end_matches('/'),
            chain,
            address
        );
        let mut request = self.client.get(&url).timeout(WAREHOUSE_TIMEOUT);
        if let Some(key) = &self.config.warehouse_api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppError::ExternalApi(format!(
                "warehouse returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body.get("total_volume_usd").and_then(|v| v.as_f64()))
    }
}
