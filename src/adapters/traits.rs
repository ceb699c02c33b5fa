//! Market adapter trait
//!
//! The sync layer only ever talks to markets through this trait, so
//! exchanges can be added (or mocked in tests) without touching the
//! messaging core.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::errors::AdapterResult;
use super::types::{DataUpdate, Kline, MarketMetrics, MarketType};

/// Read-only market data source for one market segment
#[async_trait]
pub trait MarketAdapter: Send + Sync {
    /// Fetch up to `limit` most recent candles for a symbol/timeframe
    async fn get_klines(&self, symbol: &str, timeframe: &str, limit: usize)
        -> AdapterResult<Vec<Kline>>;

    /// Fetch the 24h snapshot metrics for a symbol
    async fn get_market_metrics(&self, symbol: &str) -> AdapterResult<MarketMetrics>;

    /// Subscribe to realtime data-change notifications
    ///
    /// Returns `None` when the adapter is poll-only (the default); the
    /// sync service then relies purely on the periodic schedule.
    fn subscribe_updates(&self) -> Option<broadcast::Receiver<DataUpdate>> {
        None
    }

    /// Market segment this adapter serves
    fn market_type(&self) -> MarketType;

    /// Short adapter name for logging
    fn adapter_name(&self) -> &'static str;
}
