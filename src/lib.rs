//! Region Bridge - Cross-region messaging and data sync
//!
//! Core pieces:
//! - Message envelope and priority-tiered streams over a log broker
//! - Regional messaging service (send, receive loop, heartbeat, correlator)
//! - Data synchronization between the SG and CN deployments
//! - Market adapters feeding the sync layer

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;

pub use error::AppError;
