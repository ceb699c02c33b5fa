//! Cross-region data synchronization
//!
//! Each region pushes the market data it is authoritative for to its
//! peer: SG owns crypto and US stocks, CN owns CN stocks. Snapshots flow
//! as `data_sync` messages at Normal priority; the receiving side's
//! `DataSyncHandler` stores them in the local [`DataCache`] and serves
//! on-demand range requests against the local adapters.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{AdapterError, Kline, MarketAdapter, MarketType};
use crate::config::SyncConfig;
use crate::error::{AppError, Result};

use super::cache::{cache_key, DataCache};
use super::handler::MessageHandler;
use super::message::{Message, MessagePriority, MessageType, Region};
use super::messaging::MessagingService;

/// Snapshot messages stay relevant for one sync window
const SNAPSHOT_TTL_SECONDS: u64 = 3600;

/// Sync-task bookkeeping entries are kept for a week, like the streams
const TASK_RETENTION: chrono::Duration = chrono::Duration::days(7);

/// Read-only snapshot of the sync counters
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub sync_requests: u64,
    pub sync_success: u64,
    pub sync_failed: u64,
    pub data_transferred: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub active_sync_tasks: usize,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    transferred: AtomicU64,
}

/// Which region is authoritative for a market segment's data
pub fn target_region_for(market: MarketType) -> Region {
    match market {
        MarketType::Crypto | MarketType::UsStock => Region::CN,
        MarketType::CnStock => Region::SG,
    }
}

/// Market segments a region pushes to its peer
fn pushed_markets(region: Region) -> &'static [MarketType] {
    match region {
        Region::SG => &[MarketType::Crypto, MarketType::UsStock],
        Region::CN => &[MarketType::CnStock],
    }
}

/// Periodic and realtime push of market data to the peer region
pub struct DataSyncService {
    messaging: Arc<MessagingService>,
    adapters: HashMap<MarketType, Arc<dyn MarketAdapter>>,
    config: SyncConfig,
    running: AtomicBool,
    shutdown: CancellationToken,
    counters: Counters,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    sync_tasks: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DataSyncService {
    pub fn new(
        messaging: Arc<MessagingService>,
        adapters: HashMap<MarketType, Arc<dyn MarketAdapter>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            messaging,
            adapters,
            config,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            counters: Counters::default(),
            last_sync: Mutex::new(None),
            sync_tasks: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch the periodic loop and one forwarder per realtime adapter
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");

        let periodic = Arc::clone(self);
        tasks.push(tokio::spawn(async move { periodic.periodic_loop().await }));

        for adapter in self.adapters.values() {
            if let Some(rx) = adapter.subscribe_updates() {
                let forwarder = Arc::clone(self);
                let name = adapter.adapter_name();
                tasks.push(tokio::spawn(async move {
                    forwarder.forward_updates(name, rx).await
                }));
            }
        }

        info!(region = %self.messaging.region(), "Data sync service started");
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("task list lock poisoned");
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!(region = %self.messaging.region(), "Data sync service stopped");
    }

    /// Serve an on-demand range request against the local adapters
    pub async fn sync_data(
        &self,
        market: MarketType,
        symbol: &str,
        timeframe: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Kline>> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let result = self.fetch_range(market, symbol, timeframe, from, to).await;
        match &result {
            Ok(klines) => {
                self.counters.success.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .transferred
                    .fetch_add(klines.len() as u64, Ordering::Relaxed);
                self.touch_sync_time();
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(market = %market, symbol, timeframe, error = %e, "Sync request failed");
            }
        }
        result
    }

    async fn fetch_range(
        &self,
        market: MarketType,
        symbol: &str,
        timeframe: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Kline>> {
        let adapter = self.adapter_for(market)?;
        let klines = adapter
            .get_klines(symbol, timeframe, self.config.kline_limit)
            .await?;
        Ok(klines
            .into_iter()
            .filter(|k| from.is_none_or(|f| k.timestamp >= f))
            .filter(|k| to.is_none_or(|t| k.timestamp <= t))
            .collect())
    }

    /// Operator-triggered backfill of one symbol/timeframe
    pub async fn manual_sync(
        &self,
        market: MarketType,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<usize> {
        let adapter = self.adapter_for(market)?;
        let klines = adapter.get_klines(symbol, timeframe, limit).await?;
        let count = klines.len();

        let sent = self
            .push_snapshot(
                market,
                json!({
                    "marketType": market.as_str(),
                    "symbol": symbol,
                    "timeframe": timeframe,
                    "data": klines,
                    "manualSync": true,
                    "timestamp": Utc::now(),
                }),
            )
            .await;
        if !sent {
            return Err(AppError::Broker(format!(
                "failed to push manual sync for {}",
                symbol
            )));
        }

        self.counters
            .transferred
            .fetch_add(count as u64, Ordering::Relaxed);
        self.touch_sync_time();
        info!(market = %market, symbol, timeframe, count, "Manual sync pushed");
        Ok(count)
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            sync_requests: self.counters.requests.load(Ordering::Relaxed),
            sync_success: self.counters.success.load(Ordering::Relaxed),
            sync_failed: self.counters.failed.load(Ordering::Relaxed),
            data_transferred: self.counters.transferred.load(Ordering::Relaxed),
            last_sync_time: *self.last_sync.lock().expect("sync time lock poisoned"),
            is_running: self.is_running(),
            active_sync_tasks: self.sync_tasks.lock().expect("task map lock poisoned").len(),
        }
    }

    fn adapter_for(&self, market: MarketType) -> Result<&Arc<dyn MarketAdapter>> {
        self.adapters
            .get(&market)
            .ok_or_else(|| AdapterError::NoAdapter(market.as_str().to_string()).into())
    }

    fn touch_sync_time(&self) {
        *self.last_sync.lock().expect("sync time lock poisoned") = Some(Utc::now());
    }

    // =========================================================================
    // Periodic push
    // =========================================================================

    async fn periodic_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        info!(interval_secs = self.config.interval_secs, "Periodic sync loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.is_running() {
                break;
            }
            self.sync_pass().await;
            self.sweep_sync_tasks();
        }
        info!("Periodic sync loop stopped");
    }

    /// Push one full symbol x timeframe matrix for this region's markets
    ///
    /// Per-item failures are logged and counted; the pass never aborts.
    async fn sync_pass(&self) {
        let task_id = Uuid::new_v4();
        self.sync_tasks
            .lock()
            .expect("task map lock poisoned")
            .insert(task_id, Utc::now());
        debug!(%task_id, "Sync pass started");

        for &market in pushed_markets(self.messaging.region()) {
            let adapter = match self.adapter_for(market) {
                Ok(adapter) => Arc::clone(adapter),
                Err(e) => {
                    warn!(market = %market, error = %e, "Skipping market without adapter");
                    continue;
                }
            };

            let mut jobs = Vec::new();
            for symbol in self.symbols_for(market) {
                for timeframe in &self.config.timeframes {
                    jobs.push(self.push_klines(market, &adapter, symbol, timeframe));
                }
            }
            join_all(jobs).await;

            let metric_jobs: Vec<_> = self
                .symbols_for(market)
                .iter()
                .map(|symbol| self.push_metrics(market, &adapter, symbol))
                .collect();
            join_all(metric_jobs).await;
        }

        self.touch_sync_time();
        debug!(%task_id, "Sync pass finished");
    }

    async fn push_klines(
        &self,
        market: MarketType,
        adapter: &Arc<dyn MarketAdapter>,
        symbol: &str,
        timeframe: &str,
    ) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        match adapter
            .get_klines(symbol, timeframe, self.config.kline_limit)
            .await
        {
            Ok(klines) => {
                let count = klines.len() as u64;
                let sent = self
                    .push_snapshot(
                        market,
                        json!({
                            "marketType": market.as_str(),
                            "symbol": symbol,
                            "timeframe": timeframe,
                            "data": klines,
                            "timestamp": Utc::now(),
                        }),
                    )
                    .await;
                if sent {
                    self.counters.success.fetch_add(1, Ordering::Relaxed);
                    self.counters.transferred.fetch_add(count, Ordering::Relaxed);
                } else {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(market = %market, symbol, timeframe, error = %e, "Kline fetch failed");
            }
        }
    }

    async fn push_metrics(&self, market: MarketType, adapter: &Arc<dyn MarketAdapter>, symbol: &str) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        match adapter.get_market_metrics(symbol).await {
            Ok(metrics) => {
                let sent = self
                    .push_snapshot(
                        market,
                        json!({
                            "marketType": market.as_str(),
                            "symbol": symbol,
                            "metrics": metrics,
                            "timestamp": Utc::now(),
                        }),
                    )
                    .await;
                if sent {
                    self.counters.success.fetch_add(1, Ordering::Relaxed);
                    self.counters.transferred.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(market = %market, symbol, error = %e, "Metrics fetch failed");
            }
        }
    }

    async fn push_snapshot(&self, market: MarketType, payload: Value) -> bool {
        let message = Message::new(MessageType::DataSync, payload)
            .with_priority(MessagePriority::Normal)
            .with_target_region(target_region_for(market))
            .with_ttl(SNAPSHOT_TTL_SECONDS);
        self.messaging.send_message(message).await
    }

    fn symbols_for(&self, market: MarketType) -> &[String] {
        match market {
            MarketType::Crypto => &self.config.crypto_symbols,
            MarketType::UsStock => &self.config.us_stock_symbols,
            MarketType::CnStock => &self.config.cn_stock_symbols,
        }
    }

    fn sweep_sync_tasks(&self) {
        let cutoff = Utc::now() - TASK_RETENTION;
        let mut tasks = self.sync_tasks.lock().expect("task map lock poisoned");
        tasks.retain(|_, started| *started > cutoff);
    }

    // =========================================================================
    // Realtime forwarding
    // =========================================================================

    async fn forward_updates(
        self: Arc<Self>,
        adapter_name: &'static str,
        mut rx: broadcast::Receiver<crate::adapters::DataUpdate>,
    ) {
        info!(adapter = adapter_name, "Realtime forwarder started");
        loop {
            let update = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                recv = rx.recv() => match recv {
                    Ok(update) => update,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(adapter = adapter_name, skipped, "Realtime forwarder lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let sent = self
                .push_snapshot(
                    update.market_type,
                    json!({
                        "marketType": update.market_type.as_str(),
                        "symbol": update.symbol,
                        "timeframe": update.timeframe,
                        "data": update.data,
                        "realtimeUpdate": true,
                        "timestamp": Utc::now(),
                    }),
                )
                .await;
            if sent {
                self.counters.transferred.fetch_add(1, Ordering::Relaxed);
            } else {
                error!(adapter = adapter_name, symbol = %update.symbol,
                    "Failed to forward realtime update");
            }
        }
        info!(adapter = adapter_name, "Realtime forwarder stopped");
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Consumes inbound `data_sync` messages
///
/// Three payload shapes arrive on the same type:
/// - on-demand request (`from`/`to` present) — served via
///   [`DataSyncService::sync_data`], reply sent to the source region;
/// - reply (`requestId` without a range) — absorbed, the correlator has
///   already consumed it from the mirror stream;
/// - pushed snapshot (`data` or `metrics`) — stored in the cache.
pub struct DataSyncHandler {
    // Weak: the messaging service owns this handler through its registry.
    messaging: Weak<MessagingService>,
    sync: Weak<DataSyncService>,
    cache: Option<Arc<DataCache>>,
}

impl DataSyncHandler {
    pub fn new(
        messaging: &Arc<MessagingService>,
        sync: &Arc<DataSyncService>,
        cache: Option<Arc<DataCache>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            messaging: Arc::downgrade(messaging),
            sync: Arc::downgrade(sync),
            cache,
        })
    }

    async fn handle_request(&self, message: &Message, request_id: &str) -> Result<bool> {
        let payload = &message.payload;
        let Some(sync) = self.sync.upgrade() else {
            warn!(id = %message.id, "Sync service gone, dropping request");
            return Ok(false);
        };

        let market = payload
            .get("marketType")
            .and_then(|v| v.as_str())
            .and_then(|s| MarketType::from_str(s).ok());
        let Some(market) = market else {
            warn!(id = %message.id, "Sync request with missing or unknown marketType");
            return Ok(false);
        };
        let Some(symbol) = payload.get("symbol").and_then(|v| v.as_str()) else {
            warn!(id = %message.id, "Sync request without symbol");
            return Ok(false);
        };
        let timeframe = payload
            .get("timeframe")
            .and_then(|v| v.as_str())
            .unwrap_or("1h");
        let from = parse_time(payload.get("from"));
        let to = parse_time(payload.get("to"));

        let reply_payload = match sync.sync_data(market, symbol, timeframe, from, to).await {
            Ok(klines) => json!({
                "requestId": request_id,
                "data": klines,
                "success": true,
            }),
            Err(e) => json!({
                "requestId": request_id,
                "error": e.to_string(),
                "success": false,
            }),
        };

        let Some(messaging) = self.messaging.upgrade() else {
            warn!(id = %message.id, "Messaging service gone, dropping sync reply");
            return Ok(false);
        };
        let mut reply = Message::new(MessageType::DataSync, reply_payload);
        if let Some(source) = message.source_region {
            reply = reply.with_target_region(source);
        }
        Ok(messaging.send_message(reply).await)
    }

    async fn cache_snapshot(&self, message: &Message) {
        let Some(cache) = &self.cache else { return };
        let payload = &message.payload;

        let market = payload.get("marketType").and_then(|v| v.as_str());
        let symbol = payload.get("symbol").and_then(|v| v.as_str());
        let (Some(market), Some(symbol)) = (market, symbol) else {
            debug!(id = %message.id, "Snapshot without marketType/symbol, not cached");
            return;
        };
        let timeframe = payload.get("timeframe").and_then(|v| v.as_str());

        let value = payload
            .get("data")
            .or_else(|| payload.get("metrics"))
            .cloned()
            .unwrap_or(Value::Null);
        cache.put(&cache_key(market, symbol, timeframe), value).await;
    }
}

fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait::async_trait]
impl MessageHandler for DataSyncHandler {
    async fn handle(&self, message: &Message) -> Result<bool> {
        let payload = &message.payload;
        let request_id = payload.get("requestId").and_then(|v| v.as_str());
        let has_range = payload.get("from").is_some() || payload.get("to").is_some();

        if has_range {
            let Some(request_id) = request_id else {
                warn!(id = %message.id, "Range request without requestId");
                return Ok(false);
            };
            return self.handle_request(message, request_id).await;
        }

        if request_id.is_some() {
            debug!(id = %message.id, "Absorbing sync reply");
            self.cache_snapshot(message).await;
            return Ok(true);
        }

        if payload.get("data").is_some() || payload.get("metrics").is_some() {
            self.cache_snapshot(message).await;
            debug!(id = %message.id, "Snapshot stored");
            return Ok(true);
        }

        warn!(id = %message.id, "Unrecognized data_sync payload shape");
        Ok(false)
    }

    fn supported_types(&self) -> Vec<MessageType> {
        vec![MessageType::DataSync]
    }
}
