//! In-process TTL cache for synchronized market data
//!
//! Keys follow the `cross_region_data:{market_type}:{symbol}:{timeframe}`
//! convention used by the sync service. Expired entries are invisible to
//! `get` immediately; `sweep_expired` reclaims their memory.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Default entry lifetime (1 hour)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

const KEY_PREFIX: &str = "cross_region_data";

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// TTL cache holding the latest synchronized data per key
#[derive(Debug, Default)]
pub struct DataCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

/// Build the canonical cache key for a piece of market data
pub fn cache_key(market_type: &str, symbol: &str, timeframe: Option<&str>) -> String {
    match timeframe {
        Some(tf) => format!("{}:{}:{}:{}", KEY_PREFIX, market_type, symbol, tf),
        None => format!("{}:{}:{}", KEY_PREFIX, market_type, symbol),
    }
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under the default TTL
    pub async fn put(&self, key: &str, value: Value) {
        self.put_with_ttl(key, value, DEFAULT_CACHE_TTL).await;
    }

    /// Store a value with an explicit TTL
    pub async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        debug!(key, ttl_secs = ttl.as_secs(), "Cache entry stored");
    }

    /// Fetch a value; expired entries are treated as absent
    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop all expired entries, returning how many were removed
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_format() {
        assert_eq!(
            cache_key("crypto", "BTCUSDT", Some("1h")),
            "cross_region_data:crypto:BTCUSDT:1h"
        );
        assert_eq!(
            cache_key("us_stock", "AAPL", None),
            "cross_region_data:us_stock:AAPL"
        );
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = DataCache::new();
        cache.put("k", json!({"price": 42})).await;
        assert_eq!(cache.get("k").await.unwrap()["price"], 42);
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = DataCache::new();
        cache.put("k", json!(1)).await;
        cache.put("k", json!(2)).await;
        assert_eq!(cache.get("k").await.unwrap(), json!(2));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_invisible() {
        let cache = DataCache::new();
        cache
            .put_with_ttl("k", json!(1), Duration::from_millis(0))
            .await;
        assert!(cache.get("k").await.is_none());
        // The dead entry still occupies memory until a sweep.
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.sweep_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let cache = DataCache::new();
        cache.put("live", json!(1)).await;
        cache
            .put_with_ttl("dead", json!(2), Duration::from_millis(0))
            .await;
        assert_eq!(cache.sweep_expired().await, 1);
        assert!(cache.get("live").await.is_some());
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = DataCache::new();
        cache.put("k", json!(1)).await;
        assert!(cache.remove("k").await);
        assert!(!cache.remove("k").await);
    }
}
