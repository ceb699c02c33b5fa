//! Adapter error types
//!
//! All market adapter failures are wrapped in AdapterError so the sync
//! layer can log and count them uniformly without caring which market
//! the data came from.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("No adapter registered for market type: {0}")]
    NoAdapter(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for adapter operations
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
