//! Configuration types for the regional deployment
//!
//! All settings are loaded from YAML and validated before any service
//! starts. The broker section describes this region's own broker
//! instance only; cross-region replication is provisioned outside the
//! application.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::message::Region;
use crate::error::AppError;

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which deployment this process belongs to
    pub region: Region,
    /// This region's broker instance
    pub broker: BrokerConfig,
    /// Messaging service tuning
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// Data synchronization schedule
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        self.broker.validate()?;
        self.messaging.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

/// Connection settings for the regional broker (Redis)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    /// Database index
    #[serde(default)]
    pub db: u8,
}

impl BrokerConfig {
    /// Connection URL in the form `redis://[:password@]host:port/db`
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.host.trim().is_empty() {
            return Err(AppError::Config("broker.host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(AppError::Config("broker.port cannot be 0".to_string()));
        }
        Ok(())
    }
}

/// Messaging service tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Heartbeat send interval in seconds
    pub heartbeat_secs: u64,
    /// Bounded blocking wait per stream read, in milliseconds
    pub block_ms: u64,
    /// Pause between full passes over the 24 streams, in milliseconds
    pub pass_delay_ms: u64,
    /// Block per poll while waiting for a correlated response, in milliseconds
    pub response_poll_ms: u64,
    /// Retention window for stream trimming, in days
    pub retention_days: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            block_ms: 1000,
            pass_delay_ms: 100,
            response_poll_ms: 200,
            retention_days: 7,
        }
    }
}

impl MessagingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn pass_delay(&self) -> Duration {
        Duration::from_millis(self.pass_delay_ms)
    }

    pub fn response_poll(&self) -> Duration {
        Duration::from_millis(self.response_poll_ms)
    }

    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days as i64)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.block_ms == 0 {
            return Err(AppError::Config(
                "messaging.block_ms must be > 0 (shutdown latency is bounded by it)".to_string(),
            ));
        }
        if self.heartbeat_secs == 0 {
            return Err(AppError::Config("messaging.heartbeat_secs must be > 0".to_string()));
        }
        if self.retention_days == 0 {
            return Err(AppError::Config("messaging.retention_days must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Symbol/timeframe matrix for the periodic sync schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Periodic sync interval in seconds
    pub interval_secs: u64,
    /// Candles fetched per symbol/timeframe on each pass
    pub kline_limit: usize,
    pub timeframes: Vec<String>,
    pub crypto_symbols: Vec<String>,
    pub us_stock_symbols: Vec<String>,
    pub cn_stock_symbols: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            kline_limit: 24,
            timeframes: vec!["1h".to_string(), "4h".to_string(), "1d".to_string()],
            crypto_symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "ADAUSDT".to_string(),
            ],
            us_stock_symbols: vec![
                "AAPL".to_string(),
                "MSFT".to_string(),
                "GOOGL".to_string(),
            ],
            cn_stock_symbols: vec![
                "000001.SZ".to_string(),
                "600000.SH".to_string(),
                "000002.SZ".to_string(),
            ],
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.interval_secs == 0 {
            return Err(AppError::Config("sync.interval_secs must be > 0".to_string()));
        }
        if self.kline_limit == 0 {
            return Err(AppError::Config("sync.kline_limit must be > 0".to_string()));
        }
        if self.timeframes.is_empty() {
            return Err(AppError::Config("sync.timeframes cannot be empty".to_string()));
        }
        Ok(())
    }
}
