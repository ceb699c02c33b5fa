//! Core module - message envelope, broker, messaging, sync, cache
//!
//! This module uses **explicit re-exports** instead of glob exports
//! (`pub use module::*`) to provide better API visibility and prevent
//! accidental public API changes.
//!
//! ## Usage
//! Prefer importing from `crate::core`:
//! ```ignore
//! use crate::core::{Message, MessagingService, DataSyncService};
//! ```

pub mod ai;
pub mod broker;
pub mod cache;
pub mod handler;
pub mod message;
pub mod messaging;
pub mod redis_broker;
pub mod streams;
pub mod sync;

// Explicit re-exports for message module
pub use message::{
    Message, MessagePriority, MessageType, Region, DEFAULT_MAX_RETRIES, DEFAULT_TTL_SECONDS,
};

// Explicit re-exports for streams module
pub use streams::{all_streams, response_stream, stream_name, streams_for_priority};

// Explicit re-exports for broker modules
pub use broker::{Broker, InMemoryBroker, StreamEntry};
pub use redis_broker::RedisBroker;

// Explicit re-exports for handler module
pub use handler::{HandlerRegistry, MessageHandler};

// Explicit re-exports for messaging module
pub use messaging::{MessagingService, ServiceStats};

// Explicit re-exports for sync module
pub use sync::{target_region_for, DataSyncHandler, DataSyncService, SyncStats};

// Explicit re-exports for ai module
pub use ai::{AiAnalysisHandler, AiService};

// Explicit re-exports for cache module
pub use cache::{cache_key, DataCache, DEFAULT_CACHE_TTL};
