//! Environment variable overrides for configuration
//!
//! Applied after the YAML file is loaded: a set variable wins over the
//! file, an unset one leaves the file value alone.
//!
//! Supported variables:
//! - `HEARTBEAT_INTERVAL_SECS` — heartbeat send interval
//! - `STREAM_BLOCK_MS` — bounded blocking wait per stream read
//! - `STREAM_RETENTION_DAYS` — stream retention window for trims
//! - `SYNC_INTERVAL_SECS` — periodic data sync interval

use super::types::AppConfig;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Fold any set environment overrides into `config`
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(secs) = env_u64("HEARTBEAT_INTERVAL_SECS") {
        config.messaging.heartbeat_secs = secs;
    }
    if let Some(ms) = env_u64("STREAM_BLOCK_MS") {
        config.messaging.block_ms = ms;
    }
    if let Some(days) = env_u64("STREAM_RETENTION_DAYS") {
        config.messaging.retention_days = days;
    }
    if let Some(secs) = env_u64("SYNC_INTERVAL_SECS") {
        config.sync.interval_secs = secs;
    }
}
