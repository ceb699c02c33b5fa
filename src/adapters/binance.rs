//! Binance REST adapter (crypto market data)
//!
//! Poll-only adapter over the public REST API:
//! - `GET /api/v3/klines` for candles
//! - `GET /api/v3/ticker/24hr` for snapshot metrics
//!
//! No authentication is required for these endpoints. Realtime updates
//! are pushed through an internal broadcast channel when `notify_update`
//! is called (e.g. by a websocket feed wired in elsewhere).

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::errors::{AdapterError, AdapterResult};
use super::traits::MarketAdapter;
use super::types::{DataUpdate, Kline, MarketMetrics, MarketType};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Binance 24h ticker response (only the fields we consume)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    price_change_percent: String,
    high_price: String,
    low_price: String,
    volume: String,
}

pub struct BinanceAdapter {
    client: reqwest::Client,
    base_url: String,
    update_tx: broadcast::Sender<DataUpdate>,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create an adapter against a custom endpoint (used by tests)
    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            update_tx,
        }
    }

    /// Publish a realtime data-change event to subscribers
    pub fn notify_update(&self, update: DataUpdate) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.update_tx.send(update);
    }

    fn parse_f64(value: &str, field: &str) -> AdapterResult<f64> {
        value
            .parse::<f64>()
            .map_err(|e| AdapterError::Parse(format!("{}: {}", field, e)))
    }

    /// Parse one kline row from Binance's positional array format
    fn parse_kline(row: &serde_json::Value) -> AdapterResult<Kline> {
        let arr = row
            .as_array()
            .ok_or_else(|| AdapterError::Parse("kline row is not an array".to_string()))?;
        if arr.len() < 6 {
            return Err(AdapterError::Parse(format!(
                "kline row has {} fields, expected at least 6",
                arr.len()
            )));
        }

        let open_time = arr[0]
            .as_i64()
            .ok_or_else(|| AdapterError::Parse("kline open time is not an integer".to_string()))?;
        let timestamp = Utc
            .timestamp_millis_opt(open_time)
            .single()
            .ok_or_else(|| AdapterError::Parse(format!("invalid kline timestamp: {}", open_time)))?;

        let str_at = |idx: usize, field: &str| -> AdapterResult<f64> {
            let raw = arr[idx]
                .as_str()
                .ok_or_else(|| AdapterError::Parse(format!("{} is not a string", field)))?;
            Self::parse_f64(raw, field)
        };

        Ok(Kline {
            timestamp,
            open: str_at(1, "open")?,
            high: str_at(2, "high")?,
            low: str_at(3, "low")?,
            close: str_at(4, "close")?,
            volume: str_at(5, "volume")?,
        })
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketAdapter for BinanceAdapter {
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> AdapterResult<Vec<Kline>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, timeframe, limit
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::Api(format!(
                "klines request for {} failed with status {}",
                symbol,
                response.status()
            )));
        }

        let rows: Vec<serde_json::Value> = response.json().await?;
        let klines = rows
            .iter()
            .map(Self::parse_kline)
            .collect::<AdapterResult<Vec<_>>>()?;

        debug!(symbol, timeframe, count = klines.len(), "Fetched klines");
        Ok(klines)
    }

    async fn get_market_metrics(&self, symbol: &str) -> AdapterResult<MarketMetrics> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::Api(format!(
                "ticker request for {} failed with status {}",
                symbol,
                response.status()
            )));
        }

        let ticker: Ticker24h = response.json().await?;
        Ok(MarketMetrics {
            symbol: ticker.symbol,
            last_price: Self::parse_f64(&ticker.last_price, "lastPrice")?,
            price_change_percent: Self::parse_f64(&ticker.price_change_percent, "priceChangePercent")?,
            high_24h: Self::parse_f64(&ticker.high_price, "highPrice")?,
            low_24h: Self::parse_f64(&ticker.low_price, "lowPrice")?,
            volume_24h: Self::parse_f64(&ticker.volume, "volume")?,
            updated_at: Utc::now(),
        })
    }

    fn subscribe_updates(&self) -> Option<broadcast::Receiver<DataUpdate>> {
        Some(self.update_tx.subscribe())
    }

    fn market_type(&self) -> MarketType {
        MarketType::Crypto
    }

    fn adapter_name(&self) -> &'static str {
        "binance"
    }
}
