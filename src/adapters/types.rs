//! Shared market data types used by adapters and the sync layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market segments served by the platform
///
/// Each market is owned by one region: crypto and US equities are pulled
/// in SG, China A-shares in CN. The owning region pushes snapshots to the
/// peer (see `DataSyncService`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Crypto,
    UsStock,
    CnStock,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Crypto => "crypto",
            MarketType::UsStock => "us_stock",
            MarketType::CnStock => "cn_stock",
        }
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crypto" => Ok(MarketType::Crypto),
            "us_stock" => Ok(MarketType::UsStock),
            "cn_stock" => Ok(MarketType::CnStock),
            other => Err(format!("unknown market type: {}", other)),
        }
    }
}

/// Single OHLCV candle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kline {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Per-symbol market snapshot metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketMetrics {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    pub updated_at: DateTime<Utc>,
}

/// Realtime "data changed" event published by adapters
///
/// Forwarded to the peer region immediately, bypassing the periodic
/// sync schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUpdate {
    pub market_type: MarketType,
    pub symbol: String,
    pub timeframe: Option<String>,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_type_round_trip() {
        for market in [MarketType::Crypto, MarketType::UsStock, MarketType::CnStock] {
            let parsed: MarketType = market.as_str().parse().unwrap();
            assert_eq!(parsed, market);
        }
    }

    #[test]
    fn test_market_type_unknown() {
        assert!("fx_spot".parse::<MarketType>().is_err());
    }

    #[test]
    fn test_market_type_serde_matches_as_str() {
        let json = serde_json::to_string(&MarketType::UsStock).unwrap();
        assert_eq!(json, "\"us_stock\"");
    }
}
