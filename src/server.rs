use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::adapters::{
    EvmScanAdapter, SolanaPollAdapter, SolanaWsAdapter, SourceAdapter, WhaleAlertAdapter,
    XrpWsAdapter,
};
use crate::config::Config;
use crate::dedup::SharedDedupStats;
use crate::engine::WhaleIntelligenceEngine;
use crate::error::AppResult;
use crate::intel::AddressIntelligence;
use crate::prices::PriceOracle;
use crate::sentiment::SentimentAggregator;
use crate::store::ClassifiedEventStore;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ClassifiedEventStore>,
    pub aggregator: Arc<SentimentAggregator>,
    pub dedup_stats: SharedDedupStats,
    pub adapters: Vec<Arc<dyn SourceAdapter>>,
    pub supervisor: Arc<Supervisor>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build every component and start the pipeline under the supervisor.
    pub async fn new(config: Config) -> AppResult<Self> {
        let config = Arc::new(config);

        let intel = match &config.address_intel_path {
            Some(path) => Arc::new(AddressIntelligence::with_snapshot(std::path::Path::new(path))?),
            None => Arc::new(AddressIntelligence::seeded()),
        };
        tracing::info!("✅ Address intelligence ready ({} records)", intel.len());

        let prices = Arc::new(PriceOracle::new());
        let store = Arc::new(ClassifiedEventStore::new(
            std::time::Duration::from_secs(config.ces_retention_seconds),
            config.ces_max_entries,
        ));
        let aggregator = Arc::new(SentimentAggregator::new(
            Arc::clone(&store),
            config.sentiment_window_seconds(),
            config.sentiment_min_tx,
        ));
        let engine = Arc::new(WhaleIntelligenceEngine::new(
            intel,
            Arc::clone(&prices),
            Arc::clone(&config),
        ));

        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        if config.ethereum.enabled {
            adapters.push(Arc::new(EvmScanAdapter::ethereum(
                config.ethereum.clone(),
                config.global_usd_threshold,
                Arc::clone(&prices),
            )));
        }
        if config.polygon.enabled {
            adapters.push(Arc::new(EvmScanAdapter::polygon(
                config.polygon.clone(),
                config.global_usd_threshold,
                Arc::clone(&prices),
            )));
        }
        if config.solana_ws.enabled {
            adapters.push(Arc::new(SolanaWsAdapter::new(
                config.solana_ws.clone(),
                config.global_usd_threshold,
                Arc::clone(&prices),
            )));
        }
        if config.solana_poll.enabled {
            adapters.push(Arc::new(SolanaPollAdapter::new(
                config.solana_poll.clone(),
                config.global_usd_threshold,
                Arc::clone(&prices),
            )));
        }
        if config.xrp.enabled {
            adapters.push(Arc::new(XrpWsAdapter::new(
                config.xrp.clone(),
                config.global_usd_threshold,
                Arc::clone(&prices),
            )));
        }
        if config.whale_alert.enabled {
            adapters.push(Arc::new(WhaleAlertAdapter::new(
                config.whale_alert.clone(),
                config.global_usd_threshold,
                config.stablecoin_symbols.clone(),
            )));
        }
        tracing::info!("✅ {} source adapter(s) enabled", adapters.len());

        let dedup_stats: SharedDedupStats = Default::default();
        let supervisor = Arc::new(
            Supervisor::start(
                Arc::clone(&config),
                engine,
                Arc::clone(&store),
                Arc::clone(&aggregator),
                Arc::clone(&dedup_stats),
                adapters.clone(),
            )
            .await,
        );

        Ok(Self {
            config,
            store,
            aggregator,
            dedup_stats,
            adapters,
            supervisor,
            started_at: Utc::now(),
        })
    }
}
