//! Market data adapters
//!
//! This module provides the abstractions the sync layer uses to read
//! market data, plus the Binance REST implementation for crypto.

pub mod binance;
pub mod errors;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use binance::BinanceAdapter;
pub use errors::{AdapterError, AdapterResult};
pub use traits::MarketAdapter;
pub use types::{DataUpdate, Kline, MarketMetrics, MarketType};
