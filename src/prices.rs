//! Price Oracle: `symbol → usd_price` with a TTL cache and a fallback
//! constant table used when the network source is unavailable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

const PRICE_CACHE_TTL: Duration = Duration::from_secs(300);
const PRICE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Symbols we can resolve to CoinGecko ids. Everything else rides on the
/// fallback table or returns no price.
fn coingecko_id(symbol: &str) -> Option<&'static str> {
    Some(match symbol {
        "ETH" | "WETH" => "ethereum",
        "BTC" | "WBTC" => "bitcoin",
        "LINK" => "chainlink",
        "UNI" => "uniswap",
        "MATIC" | "WMATIC" => "matic-network",
        "SOL" | "WSOL" => "solana",
        "XRP" => "ripple",
        "RAY" => "raydium",
        "JUP" => "jupiter-exchange-solana",
        "AAVE" => "aave",
        "CRV" => "curve-dao-token",
        "PEPE" => "pepe",
        _ => return None,
    })
}

fn fallback_table() -> HashMap<String, f64> {
    [
        ("ETH", 3_000.0),
        ("WETH", 3_000.0),
        ("BTC", 60_000.0),
        ("WBTC", 60_000.0),
        ("LINK", 15.0),
        ("UNI", 8.0),
        ("MATIC", 0.6),
        ("WMATIC", 0.6),
        ("SOL", 150.0),
        ("WSOL", 150.0),
        ("XRP", 0.5),
        ("RAY", 2.0),
        ("JUP", 0.8),
        ("AAVE", 90.0),
        ("CRV", 0.4),
    ]
    .iter()
    .map(|(s, p)| (s.to_string(), *p))
    .collect()
}

struct CachedPrice {
    price: f64,
    fetched_at: Instant,
}

pub struct PriceOracle {
    client: reqwest::Client,
    base_url: String,
    cache: RwLock<HashMap<String, CachedPrice>>,
    fallback: HashMap<String, f64>,
    ttl: Duration,
}

impl PriceOracle {
    pub fn new() -> Self {
        Self::with_base_url("https://api.coingecko.com/api/v3".to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            cache: RwLock::new(HashMap::new()),
            fallback: fallback_table(),
            ttl: PRICE_CACHE_TTL,
        }
    }

    /// Current USD price for a symbol. Cache first, then the network
    /// source, then the fallback table. Returns `None` only for symbols
    /// unknown to all three, which callers treat as "skip this event".
    pub async fn usd_price(&self, symbol: &str) -> Option<f64> {
        let symbol = symbol.to_uppercase();

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&symbol) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Some(cached.price);
                }
            }
        }

        if let Some(price) = self.fetch(&symbol).await {
            let mut cache = self.cache.write().await;
            cache.insert(
                symbol.clone(),
                CachedPrice {
                    price,
                    fetched_at: Instant::now(),
                },
            );
            return Some(price);
        }

        // Stale cache beats the static fallback.
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&symbol) {
                debug!("Using stale cached price for {}", symbol);
                return Some(cached.price);
            }
        }

        self.fallback.get(&symbol).copied()
    }

    async fn fetch(&self, symbol: &str) -> Option<f64> {
        let id = coingecko_id(symbol)?;
        let url = format!("{}/simple/price?ids={}&vs_currencies=usd", self.base_url, id);

        let response = match self
            .client
            .get(&url)
            .timeout(PRICE_FETCH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("⚠️ Price fetch failed for {}: {}", symbol, e);
                return None;
            }
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("⚠️ Price API rate limited, falling back for {}", symbol);
            return None;
        }

        let body: serde_json::Value = response.json().await.ok()?;
        body.get(id)?.get("usd")?.as_f64()
    }

    /// Pre-warm the cache with known values (used by tests and the startup
    /// path so the first poll cycle does not block on the network).
    pub async fn prime(&self, prices: &[(&str, f64)]) {
        let mut cache = self.cache.write().await;
        for (symbol, price) in prices {
            cache.insert(
                symbol.to_uppercase(),
                CachedPrice {
                    price: *price,
                    fetched_at: Instant::now(),
                },
            );
        }
    }
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new()
    }
}
