//! Region Bridge entry point
//!
//! Wires one regional deployment:
//! 1. Loads configuration
//! 2. Connects the Redis Streams broker
//! 3. Starts the messaging service with the data-sync handler
//! 4. Starts the data sync service with this region's market adapters
//! 5. Runs stream/cache maintenance until Ctrl+C

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use region_bridge::adapters::{BinanceAdapter, MarketAdapter, MarketType};
use region_bridge::config::{self, init_logging};
use region_bridge::core::{
    DataCache, DataSyncHandler, DataSyncService, MessagingService, RedisBroker, Region,
};

/// Streams and cache get swept once an hour
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();
    init_logging();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let mut config = match config::load_config(Path::new(&config_path)) {
        Ok(cfg) => {
            info!(region = %cfg.region, broker = %cfg.broker.host, "Configuration loaded");
            cfg
        }
        Err(e) => {
            error!(error = %e, "Configuration failed");
            std::process::exit(1);
        }
    };
    config::constants::apply_env_overrides(&mut config);

    let broker = Arc::new(RedisBroker::connect(&config.broker).await?);
    let messaging = Arc::new(MessagingService::new(
        config.region,
        broker,
        config.messaging.clone(),
    ));

    // Each region only serves the markets it is authoritative for; SG has
    // the crypto feed, CN-side stock adapters are wired in their deployment.
    let mut adapters: HashMap<MarketType, Arc<dyn MarketAdapter>> = HashMap::new();
    if config.region == Region::SG {
        adapters.insert(MarketType::Crypto, Arc::new(BinanceAdapter::new()));
    }

    let cache = Arc::new(DataCache::new());
    let sync = Arc::new(DataSyncService::new(
        messaging.clone(),
        adapters,
        config.sync.clone(),
    ));
    messaging.register_handler(DataSyncHandler::new(&messaging, &sync, Some(cache.clone())));

    messaging.start().await?;
    sync.start();

    let maint_messaging = messaging.clone();
    let maint_cache = cache.clone();
    let maintenance = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            maint_messaging.trim_expired_messages().await;
            maint_cache.sweep_expired().await;
        }
    });

    info!(region = %config.region, "Region bridge running, press Ctrl+C to stop");
    signal::ctrl_c().await?;
    info!("Graceful shutdown initiated");

    maintenance.abort();
    sync.stop().await;
    messaging.stop().await;
    info!("Clean exit");
    Ok(())
}
