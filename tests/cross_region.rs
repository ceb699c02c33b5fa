//! Two-region integration tests
//!
//! Both regional services run against one shared in-memory broker, which
//! models the geo-replicated stream deployment: everything SG appends is
//! visible to CN and vice versa, while each region consumes through its
//! own consumer group.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use region_bridge::adapters::{
    AdapterError, AdapterResult, Kline, MarketAdapter, MarketMetrics, MarketType,
};
use region_bridge::config::{MessagingConfig, SyncConfig};
use region_bridge::core::{
    cache_key, Broker, DataCache, DataSyncHandler, DataSyncService, InMemoryBroker, Message,
    MessageType, MessagingService, Region,
};

fn fast_messaging() -> MessagingConfig {
    MessagingConfig {
        heartbeat_secs: 3600,
        block_ms: 20,
        pass_delay_ms: 5,
        response_poll_ms: 20,
        retention_days: 7,
    }
}

fn sync_config() -> SyncConfig {
    SyncConfig {
        interval_secs: 3600,
        kline_limit: 24,
        timeframes: vec!["1h".to_string()],
        crypto_symbols: vec!["BTCUSDT".to_string()],
        us_stock_symbols: vec![],
        cn_stock_symbols: vec!["000001.SZ".to_string()],
    }
}

struct FixtureAdapter {
    market: MarketType,
    klines: Vec<Kline>,
}

impl FixtureAdapter {
    fn new(market: MarketType, count: usize) -> Self {
        let klines = (0..count)
            .map(|i| Kline {
                timestamp: Utc::now() - chrono::Duration::hours(i as i64),
                open: 100.0,
                high: 110.0,
                low: 95.0,
                close: 105.0 + i as f64,
                volume: 1000.0,
            })
            .collect();
        Self { market, klines }
    }
}

#[async_trait]
impl MarketAdapter for FixtureAdapter {
    async fn get_klines(
        &self,
        _symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> AdapterResult<Vec<Kline>> {
        Ok(self.klines.iter().take(limit).cloned().collect())
    }

    async fn get_market_metrics(&self, symbol: &str) -> AdapterResult<MarketMetrics> {
        self.klines
            .first()
            .map(|k| MarketMetrics {
                symbol: symbol.to_string(),
                last_price: k.close,
                price_change_percent: 0.5,
                high_24h: k.high,
                low_24h: k.low,
                volume_24h: k.volume,
                updated_at: Utc::now(),
            })
            .ok_or_else(|| AdapterError::UnknownSymbol(symbol.to_string()))
    }

    fn market_type(&self) -> MarketType {
        self.market
    }

    fn adapter_name(&self) -> &'static str {
        "fixture"
    }
}

struct RegionHarness {
    messaging: Arc<MessagingService>,
    sync: Arc<DataSyncService>,
    cache: Arc<DataCache>,
}

impl RegionHarness {
    /// Messaging + sync + handler for one region, sharing `broker`
    async fn start(broker: &InMemoryBroker, region: Region, market: MarketType) -> Self {
        let messaging = Arc::new(MessagingService::new(
            region,
            Arc::new(broker.clone()),
            fast_messaging(),
        ));
        let mut adapters: HashMap<MarketType, Arc<dyn MarketAdapter>> = HashMap::new();
        adapters.insert(market, Arc::new(FixtureAdapter::new(market, 3)));
        let sync = Arc::new(DataSyncService::new(
            messaging.clone(),
            adapters,
            sync_config(),
        ));
        let cache = Arc::new(DataCache::new());
        messaging.register_handler(DataSyncHandler::new(&messaging, &sync, Some(cache.clone())));
        messaging.start().await.unwrap();
        Self {
            messaging,
            sync,
            cache,
        }
    }

    async fn shutdown(&self) {
        self.sync.stop().await;
        self.messaging.stop().await;
    }
}

#[tokio::test]
async fn test_cross_region_request_response_round_trip() {
    let broker = InMemoryBroker::new();
    let sg = RegionHarness::start(&broker, Region::SG, MarketType::Crypto).await;
    let cn = RegionHarness::start(&broker, Region::CN, MarketType::CnStock).await;

    let request = Message::new(
        MessageType::DataSync,
        json!({
            "marketType": "cn_stock",
            "symbol": "000001.SZ",
            "timeframe": "1h",
            "from": (Utc::now() - chrono::Duration::days(1)).to_rfc3339(),
            "to": Utc::now().to_rfc3339(),
        }),
    )
    .with_target_region(Region::CN);
    let request_id = request.id.clone();

    let payload = sg
        .messaging
        .request_response(request, Duration::from_secs(3))
        .await
        .unwrap();

    assert_eq!(payload["requestId"], request_id);
    assert_eq!(payload["success"], true);
    assert_eq!(payload["data"].as_array().unwrap().len(), 3);

    // CN served the request exactly once.
    let cn_sync = cn.sync.stats();
    assert_eq!(cn_sync.sync_requests, 1);
    assert_eq!(cn_sync.sync_success, 1);
    let cn_messaging = cn.messaging.stats();
    assert_eq!(cn_messaging.messages_processed, 1);
    assert_eq!(cn_messaging.messages_failed, 0);

    sg.shutdown().await;
    cn.shutdown().await;
}

#[tokio::test]
async fn test_periodic_snapshot_lands_in_peer_cache() {
    let broker = InMemoryBroker::new();
    let sg = RegionHarness::start(&broker, Region::SG, MarketType::Crypto).await;
    let cn = RegionHarness::start(&broker, Region::CN, MarketType::CnStock).await;

    // First periodic tick fires immediately on start.
    sg.sync.start();

    let key = cache_key("crypto", "BTCUSDT", Some("1h"));
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Some(cached) = cn.cache.get(&key).await {
            assert_eq!(cached.as_array().unwrap().len(), 3);
            break;
        }
        assert!(Instant::now() < deadline, "snapshot never reached CN cache");
        sleep(Duration::from_millis(20)).await;
    }

    // SG consumed its own push but skipped it (targeted at CN).
    assert_eq!(sg.messaging.stats().messages_processed, 0);
    assert!(cn.messaging.stats().messages_processed >= 1);

    sg.shutdown().await;
    cn.shutdown().await;
}

#[tokio::test]
async fn test_expired_request_is_dropped_without_counters() {
    let broker = InMemoryBroker::new();
    let cn = RegionHarness::start(&broker, Region::CN, MarketType::CnStock).await;

    let mut request = Message::new(
        MessageType::DataSync,
        json!({
            "marketType": "cn_stock",
            "symbol": "000001.SZ",
            "from": (Utc::now() - chrono::Duration::days(1)).to_rfc3339(),
        }),
    )
    .with_target_region(Region::CN)
    .with_ttl(1);
    request.created_at = Utc::now() - chrono::Duration::seconds(5);
    request.source_region = Some(Region::SG);
    broker
        .append("data_sync_normal", &request.to_json().unwrap())
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while cn.messaging.stats().messages_received == 0 {
        assert!(Instant::now() < deadline, "entry never claimed");
        sleep(Duration::from_millis(20)).await;
    }
    sleep(Duration::from_millis(100)).await;

    let stats = cn.messaging.stats();
    assert_eq!(stats.messages_processed, 0);
    assert_eq!(stats.messages_failed, 0);
    assert_eq!(cn.sync.stats().sync_requests, 0);

    cn.shutdown().await;
}
