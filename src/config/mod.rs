//! Configuration module: YAML types, loading, logging setup, constants
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `BrokerConfig`, `MessagingConfig`, `SyncConfig`)
//! - YAML loading functionality (`load_config`)
//! - Logging initialization (`init_logging`)
//! - Environment variable overrides (`constants::apply_env_overrides`)

pub mod constants;
mod loader;
pub mod logging;
mod types;

// Re-export types
pub use types::{AppConfig, BrokerConfig, MessagingConfig, SyncConfig};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};

// Re-export logging init
pub use logging::init_logging;
