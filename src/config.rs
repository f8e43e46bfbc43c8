use std::collections::HashSet;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedToken {
    pub symbol: String,
    pub contract: String,
    pub decimals: u32,
    #[serde(default)]
    pub min_threshold_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedMint {
    pub symbol: String,
    pub mint: String,
    pub decimals: u32,
}

#[derive(Debug, Clone)]
pub struct WhaleThresholds {
    pub mega_whale_usd: f64,
    pub whale_usd: f64,
    pub large_trader_usd: f64,
    pub medium_trader_usd: f64,
    pub score_threshold: f64,
    pub confidence_threshold: f64,
}

impl Default for WhaleThresholds {
    fn default() -> Self {
        Self {
            mega_whale_usd: 10_000_000.0,
            whale_usd: 1_000_000.0,
            large_trader_usd: 100_000.0,
            medium_trader_usd: 10_000.0,
            score_threshold: 60.0,
            confidence_threshold: 0.70,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationThresholds {
    pub high_confidence: f64,
    pub moderate_signal: f64,
    pub medium_confidence: f64,
    pub aggregation_threshold: f64,
    pub usd_value_boost_threshold: f64,
    pub usd_value_boost_amount: f64,
    pub gas_urgency_boost: f64,
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self {
            high_confidence: 0.80,
            moderate_signal: 0.70,
            medium_confidence: 0.60,
            aggregation_threshold: 0.50,
            usd_value_boost_threshold: 100_000.0,
            usd_value_boost_amount: 0.10,
            gas_urgency_boost: 0.08,
        }
    }
}

/// Phase priors used by the master classifier. The top three are the
/// documented defaults; the rest are tunables.
#[derive(Debug, Clone)]
pub struct PhaseWeights {
    pub cex: f64,
    pub dex: f64,
    pub stablecoin: f64,
    pub market_maker: f64,
    pub heuristic: f64,
    pub wallet_behavior: f64,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            cex: 0.45,
            dex: 0.40,
            stablecoin: 0.25,
            market_maker: 0.20,
            heuristic: 0.10,
            wallet_behavior: 0.10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvmScanConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub poll_interval_secs: u64,
    pub watchlist: Vec<WatchedToken>,
}

#[derive(Debug, Clone)]
pub struct SolanaWsConfig {
    pub enabled: bool,
    pub ws_url: String,
    pub mints: Vec<WatchedMint>,
}

#[derive(Debug, Clone)]
pub struct SolanaPollConfig {
    pub enabled: bool,
    pub rpc_url: String,
    pub poll_interval_secs: u64,
    pub mints: Vec<WatchedMint>,
}

#[derive(Debug, Clone)]
pub struct XrpConfig {
    pub enabled: bool,
    pub ws_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WhaleAlertConfig {
    pub enabled: bool,
    pub ws_url: String,
    pub api_key: Option<String>,
    pub blockchains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub portfolio_api_url: String,
    pub portfolio_api_key: Option<String>,
    pub warehouse_url: String,
    pub warehouse_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_consecutive_failures: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            backoff_base_secs: 2,
            backoff_cap_secs: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub port: u16,

    pub global_usd_threshold: f64,
    pub whale: WhaleThresholds,
    pub classification: ClassificationThresholds,
    pub weights: PhaseWeights,

    pub ces_retention_seconds: u64,
    pub ces_max_entries: usize,

    pub sentiment_window_hours: u64,
    pub sentiment_tick_seconds: u64,
    pub sentiment_min_tx: u64,

    pub ethereum: EvmScanConfig,
    pub polygon: EvmScanConfig,
    pub solana_ws: SolanaWsConfig,
    pub solana_poll: SolanaPollConfig,
    pub xrp: XrpConfig,
    pub whale_alert: WhaleAlertConfig,

    pub stablecoin_symbols: HashSet<String>,
    pub enrichment: EnrichmentConfig,
    pub restart: RestartPolicy,
    pub shutdown_grace_secs: u64,
    pub address_intel_path: Option<String>,
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn default_eth_watchlist() -> Vec<WatchedToken> {
    vec![
        WatchedToken {
            symbol: "WETH".to_string(),
            contract: "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".to_string(),
            decimals: 18,
            min_threshold_usd: None,
        },
        WatchedToken {
            symbol: "LINK".to_string(),
            contract: "0x514910771af9ca656af840dff83e8264ecf986ca".to_string(),
            decimals: 18,
            min_threshold_usd: None,
        },
        WatchedToken {
            symbol: "UNI".to_string(),
            contract: "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984".to_string(),
            decimals: 18,
            min_threshold_usd: None,
        },
        WatchedToken {
            symbol: "WBTC".to_string(),
            contract: "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599".to_string(),
            decimals: 8,
            min_threshold_usd: None,
        },
    ]
}

fn default_polygon_watchlist() -> Vec<WatchedToken> {
    vec![
        WatchedToken {
            symbol: "WMATIC".to_string(),
            contract: "0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270".to_string(),
            decimals: 18,
            min_threshold_usd: None,
        },
        WatchedToken {
            symbol: "WETH".to_string(),
            contract: "0x7ceb23fd6bc0add59e62ac25578270cff1b9f619".to_string(),
            decimals: 18,
            min_threshold_usd: None,
        },
    ]
}

fn default_solana_mints() -> Vec<WatchedMint> {
    vec![
        WatchedMint {
            symbol: "SOL".to_string(),
            mint: "So11111111111111111111111111111111111111112".to_string(),
            decimals: 9,
        },
        WatchedMint {
            symbol: "RAY".to_string(),
            mint: "4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R".to_string(),
            decimals: 6,
        },
        WatchedMint {
            symbol: "JUP".to_string(),
            mint: "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN".to_string(),
            decimals: 6,
        },
    ]
}

/// Core stablecoin symbols skipped by the vendor-feed adapter and used by
/// the stablecoin-flow phase. Directionless by definition.
fn default_stablecoins() -> HashSet<String> {
    [
        "USDC", "USDT", "DAI", "BUSD", "FRAX", "TUSD", "GUSD", "USDD", "USDP", "LUSD", "MIM",
        "USDC.E", "SUSD",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn watchlist_from_env(key: &str, default: Vec<WatchedToken>) -> Vec<WatchedToken> {
    match env::var(key) {
        Ok(json) => match serde_json::from_str(&json) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("⚠️ Ignoring malformed {}: {}", key, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn mints_from_env(key: &str, default: Vec<WatchedMint>) -> Vec<WatchedMint> {
    match env::var(key) {
        Ok(json) => match serde_json::from_str(&json) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("⚠️ Ignoring malformed {}: {}", key, e);
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let solana_mints = mints_from_env("WHALE_MONITOR_SOLANA_MINTS", default_solana_mints());

        let config = Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "whale-monitor".to_string()),
            port: env::var("WHALE_MONITOR_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),

            global_usd_threshold: env_f64("GLOBAL_USD_THRESHOLD", 2_500.0),
            whale: WhaleThresholds {
                mega_whale_usd: env_f64("WHALE_MEGA_WHALE_USD", 10_000_000.0),
                whale_usd: env_f64("WHALE_WHALE_USD", 1_000_000.0),
                large_trader_usd: env_f64("WHALE_LARGE_TRADER_USD", 100_000.0),
                medium_trader_usd: env_f64("WHALE_MEDIUM_TRADER_USD", 10_000.0),
                score_threshold: env_f64("WHALE_SCORE_THRESHOLD", 60.0),
                confidence_threshold: env_f64("WHALE_CONFIDENCE_THRESHOLD", 0.70),
            },
            classification: ClassificationThresholds {
                high_confidence: env_f64("CLASSIFICATION_HIGH_CONFIDENCE", 0.80),
                moderate_signal: env_f64("CLASSIFICATION_MODERATE_SIGNAL", 0.70),
                medium_confidence: env_f64("CLASSIFICATION_MEDIUM_CONFIDENCE", 0.60),
                aggregation_threshold: env_f64("CLASSIFICATION_AGGREGATION_THRESHOLD", 0.50),
                usd_value_boost_threshold: env_f64("CLASSIFICATION_USD_BOOST_THRESHOLD", 100_000.0),
                usd_value_boost_amount: env_f64("CLASSIFICATION_USD_BOOST_AMOUNT", 0.10),
                gas_urgency_boost: env_f64("CLASSIFICATION_GAS_URGENCY_BOOST", 0.08),
            },
            weights: PhaseWeights {
                cex: env_f64("PHASE_WEIGHT_CEX", 0.45),
                dex: env_f64("PHASE_WEIGHT_DEX", 0.40),
                stablecoin: env_f64("PHASE_WEIGHT_STABLECOIN", 0.25),
                market_maker: env_f64("PHASE_WEIGHT_MARKET_MAKER", 0.20),
                heuristic: env_f64("PHASE_WEIGHT_HEURISTIC", 0.10),
                wallet_behavior: env_f64("PHASE_WEIGHT_WALLET_BEHAVIOR", 0.10),
            },

            ces_retention_seconds: env_u64("CES_RETENTION_SECONDS", 7_200),
            ces_max_entries: env_u64("CES_MAX_ENTRIES", 50_000) as usize,

            sentiment_window_hours: env_u64("SENTIMENT_WINDOW_HOURS", 2),
            sentiment_tick_seconds: env_u64("SENTIMENT_TICK_SECONDS", 60),
            sentiment_min_tx: env_u64("SENTIMENT_MIN_TX", 3),

            ethereum: EvmScanConfig {
                enabled: env_bool("ETHEREUM_ENABLED", true),
                endpoint: env::var("ETHERSCAN_API_URL")
                    .unwrap_or_else(|_| "https://api.etherscan.io/api".to_string()),
                api_key: env::var("ETHERSCAN_API_KEY").ok(),
                poll_interval_secs: env_u64("ETHEREUM_POLL_INTERVAL_SECS", 60),
                watchlist: watchlist_from_env("WHALE_MONITOR_ETH_WATCHLIST", default_eth_watchlist()),
            },
            polygon: EvmScanConfig {
                enabled: env_bool("POLYGON_ENABLED", true),
                endpoint: env::var("POLYGONSCAN_API_URL")
                    .unwrap_or_else(|_| "https://api.polygonscan.com/api".to_string()),
                api_key: env::var("POLYGONSCAN_API_KEY").ok(),
                poll_interval_secs: env_u64("POLYGON_POLL_INTERVAL_SECS", 60),
                watchlist: watchlist_from_env("WHALE_MONITOR_POLYGON_WATCHLIST", default_polygon_watchlist()),
            },
            solana_ws: SolanaWsConfig {
                enabled: env_bool("SOLANA_WS_ENABLED", true),
                ws_url: env::var("SOLANA_WS_URL")
                    .unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".to_string()),
                mints: solana_mints.clone(),
            },
            solana_poll: SolanaPollConfig {
                enabled: env_bool("SOLANA_POLL_ENABLED", true),
                rpc_url: env::var("SOLANA_RPC_URL")
                    .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
                poll_interval_secs: env_u64("SOLANA_POLL_INTERVAL_SECS", 60),
                mints: solana_mints,
            },
            xrp: XrpConfig {
                enabled: env_bool("XRP_ENABLED", true),
                ws_urls: env::var("XRP_WS_URLS")
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_else(|_| {
                        vec![
                            "wss://s1.ripple.com".to_string(),
                            "wss://s2.ripple.com".to_string(),
                            "wss://xrplcluster.com".to_string(),
                        ]
                    }),
            },
            whale_alert: WhaleAlertConfig {
                enabled: env_bool("WHALE_ALERT_ENABLED", false),
                ws_url: env::var("WHALE_ALERT_WS_URL")
                    .unwrap_or_else(|_| "wss://leviathan.whale-alert.io/ws".to_string()),
                api_key: env::var("WHALE_ALERT_API_KEY").ok(),
                blockchains: vec![
                    "ethereum".to_string(),
                    "polygon".to_string(),
                    "solana".to_string(),
                    "ripple".to_string(),
                ],
            },

            stablecoin_symbols: default_stablecoins(),
            enrichment: EnrichmentConfig {
                enabled: env_bool("ENRICHMENT_ENABLED", false),
                portfolio_api_url: env::var("PORTFOLIO_API_URL")
                    .unwrap_or_else(|_| "https://api.zerion.io/v1".to_string()),
                portfolio_api_key: env::var("PORTFOLIO_API_KEY").ok(),
                warehouse_url: env::var("WAREHOUSE_API_URL").unwrap_or_default(),
                warehouse_api_key: env::var("WAREHOUSE_API_KEY").ok(),
            },
            restart: RestartPolicy {
                max_consecutive_failures: env_u64("ADAPTER_MAX_CONSECUTIVE_FAILURES", 5) as u32,
                backoff_base_secs: env_u64("ADAPTER_BACKOFF_BASE_SECS", 2),
                backoff_cap_secs: env_u64("ADAPTER_BACKOFF_CAP_SECS", 120),
            },
            shutdown_grace_secs: env_u64("SHUTDOWN_GRACE_SECS", 10),
            address_intel_path: env::var("ADDRESS_INTEL_PATH").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup configuration errors are the only errors that may kill the
    /// process (exit code 1).
    pub fn validate(&self) -> AppResult<()> {
        if self.ethereum.enabled && self.ethereum.api_key.is_none() {
            return Err(AppError::Configuration(
                "ETHERSCAN_API_KEY required when the Ethereum poller is enabled".to_string(),
            ));
        }
        if self.polygon.enabled && self.polygon.api_key.is_none() {
            return Err(AppError::Configuration(
                "POLYGONSCAN_API_KEY required when the Polygon poller is enabled".to_string(),
            ));
        }
        if self.whale_alert.enabled && self.whale_alert.api_key.is_none() {
            return Err(AppError::Configuration(
                "WHALE_ALERT_API_KEY required when the vendor feed is enabled".to_string(),
            ));
        }
        if self.ethereum.enabled && self.ethereum.watchlist.is_empty() {
            return Err(AppError::Configuration(
                "Ethereum watchlist is empty".to_string(),
            ));
        }
        if self.global_usd_threshold <= 0.0 {
            return Err(AppError::Configuration(
                "GLOBAL_USD_THRESHOLD must be positive".to_string(),
            ));
        }
        if self.xrp.enabled {
            if self.xrp.ws_urls.is_empty() {
                return Err(AppError::Configuration("XRP_WS_URLS is empty".to_string()));
            }
            for raw in &self.xrp.ws_urls {
                let parsed = url::Url::parse(raw)
                    .map_err(|e| AppError::Configuration(format!("bad XRP ws url {}: {}", raw, e)))?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    return Err(AppError::Configuration(format!(
                        "XRP ws url {} must use ws:// or wss://",
                        raw
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn sentiment_window_seconds(&self) -> u64 {
        self.sentiment_window_hours * 3600
    }

    pub fn is_stablecoin(&self, symbol: &str) -> bool {
        self.stablecoin_symbols.contains(&symbol.to_uppercase())
    }
}

/// In-memory fixture with every adapter disabled; unit tests across the
/// crate start from this and flip what they need.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        service_name: "whale-monitor".to_string(),
        port: 8080,
        global_usd_threshold: 2_500.0,
        whale: WhaleThresholds::default(),
        classification: ClassificationThresholds::default(),
        weights: PhaseWeights::default(),
        ces_retention_seconds: 7_200,
        ces_max_entries: 50_000,
        sentiment_window_hours: 2,
        sentiment_tick_seconds: 60,
        sentiment_min_tx: 3,
        ethereum: EvmScanConfig {
            enabled: false,
            endpoint: "https://api.etherscan.io/api".to_string(),
            api_key: None,
            poll_interval_secs: 60,
            watchlist: default_eth_watchlist(),
        },
        polygon: EvmScanConfig {
            enabled: false,
            endpoint: "https://api.polygonscan.com/api".to_string(),
            api_key: None,
            poll_interval_secs: 60,
            watchlist: default_polygon_watchlist(),
        },
        solana_ws: SolanaWsConfig {
            enabled: false,
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            mints: default_solana_mints(),
        },
        solana_poll: SolanaPollConfig {
            enabled: false,
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            poll_interval_secs: 60,
            mints: default_solana_mints(),
        },
        xrp: XrpConfig {
            enabled: false,
            ws_urls: vec!["wss://s1.ripple.com".to_string()],
        },
        whale_alert: WhaleAlertConfig {
            enabled: false,
            ws_url: "wss://leviathan.whale-alert.io/ws".to_string(),
            api_key: None,
            blockchains: vec!["ethereum".to_string()],
        },
        stablecoin_symbols: default_stablecoins(),
        enrichment: EnrichmentConfig {
            enabled: false,
            portfolio_api_url: String::new(),
            portfolio_api_key: None,
            warehouse_url: String::new(),
            warehouse_api_key: None,
        },
        restart: RestartPolicy::default(),
        shutdown_grace_secs: 10,
        address_intel_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_key_for_enabled_adapter() {
        let mut config = test_config();
        config.ethereum.enabled = true;
        assert!(config.validate().is_err());

        config.ethereum.api_key = Some("key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_watchlist_json_roundtrip() {
        let json = r#"[{"symbol":"PEPE","contract":"0x6982508145454ce325ddbe47a25d4ec3d2311933","decimals":18}]"#;
        let list: Vec<WatchedToken> = serde_json::from_str(json).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].symbol, "PEPE");
        assert_eq!(list[0].decimals, 18);
        assert!(list[0].min_threshold_usd.is_none());
    }

    #[test]
    fn test_validate_rejects_non_ws_xrp_url() {
        let mut config = test_config();
        config.xrp.enabled = true;
        config.xrp.ws_urls = vec!["https://s1.ripple.com".to_string()];
        assert!(config.validate().is_err());

        config.xrp.ws_urls = vec!["wss://s1.ripple.com".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stablecoin_lookup_case_insensitive() {
        let config = test_config();
        assert!(config.is_stablecoin("usdc"));
        assert!(config.is_stablecoin("USDT"));
        assert!(!config.is_stablecoin("WETH"));
    }

    #[test]
    fn test_default_thresholds() {
        let config = test_config();
        assert_eq!(config.whale.whale_usd, 1_000_000.0);
        assert_eq!(config.classification.high_confidence, 0.80);
        assert_eq!(config.weights.cex, 0.45);
        assert_eq!(config.sentiment_window_seconds(), 7_200);
    }
}
