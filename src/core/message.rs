//! Cross-region message envelope
//!
//! The wire-level unit exchanged between regions. Envelopes are JSON with
//! camelCase field names so both deployments agree on the format:
//!
//! ```json
//! {
//!   "id": "1706000000000-k3j9x2m1q",
//!   "type": "data_sync",
//!   "payload": {"symbol": "BTCUSDT"},
//!   "priority": 2,
//!   "sourceRegion": "SG",
//!   "targetRegion": "CN",
//!   "createdAt": "2024-01-23T10:13:20Z",
//!   "ttlSeconds": 3600,
//!   "retryCount": 0,
//!   "maxRetries": 3
//! }
//! ```
//!
//! `retryCount`/`maxRetries` are carried for wire compatibility but the
//! delivery loop never inspects them: delivery is at-most-once per attempt.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default time-to-live for a message (1 hour)
pub const DEFAULT_TTL_SECONDS: u64 = 3600;
/// Default max retries carried on the envelope (never acted on)
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Message categories exchanged between regions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    DataSync,
    AiAnalysis,
    TradingSignal,
    RiskAlert,
    SystemStatus,
    Heartbeat,
}

impl MessageType {
    /// All message types, in the fixed order used for stream enumeration
    pub const ALL: [MessageType; 6] = [
        MessageType::DataSync,
        MessageType::AiAnalysis,
        MessageType::TradingSignal,
        MessageType::RiskAlert,
        MessageType::SystemStatus,
        MessageType::Heartbeat,
    ];

    /// Wire name, shared with stream naming
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::DataSync => "data_sync",
            MessageType::AiAnalysis => "ai_analysis",
            MessageType::TradingSignal => "trading_signal",
            MessageType::RiskAlert => "risk_alert",
            MessageType::SystemStatus => "system_status",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message priority, ordinal on the wire (1 = lowest, 4 = highest)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessagePriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl MessagePriority {
    /// Priorities in the order the receive loop drains them
    pub const DESCENDING: [MessagePriority; 4] = [
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Normal,
        MessagePriority::Low,
    ];

    /// Stream-name suffix for this priority
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Critical => "critical",
        }
    }
}

impl From<MessagePriority> for u8 {
    fn from(priority: MessagePriority) -> u8 {
        priority as u8
    }
}

impl TryFrom<u8> for MessagePriority {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(MessagePriority::Low),
            2 => Ok(MessagePriority::Normal),
            3 => Ok(MessagePriority::High),
            4 => Ok(MessagePriority::Critical),
            other => Err(format!("invalid message priority: {}", other)),
        }
    }
}

/// Deployment regions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Region {
    SG,
    CN,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::SG => "SG",
            Region::CN => "CN",
        }
    }

    /// The other deployment
    pub fn peer(&self) -> Region {
        match self {
            Region::SG => Region::CN,
            Region::CN => Region::SG,
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit exchanged between regions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Time-ordered unique id, reused as the correlation key for responses
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Opaque structured data specific to the message type
    pub payload: serde_json::Value,
    pub priority: MessagePriority,
    /// Stamped by `send_message`, not at construction time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_region: Option<Region>,
    /// Absent = broadcast, any consumer may act
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_region: Option<Region>,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    /// Construct an envelope with defaults: Normal priority, 1h TTL, fresh id
    pub fn new(message_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            id: generate_message_id(),
            message_type,
            payload,
            priority: MessagePriority::Normal,
            source_region: None,
            target_region: None,
            created_at: Utc::now(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target_region(mut self, region: Region) -> Self {
        self.target_region = Some(region);
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Serialize to the JSON wire format
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the JSON wire format
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Message age in whole seconds at `now` (zero if clocks ran backwards)
    pub fn age_seconds(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_seconds().max(0) as u64
    }

    /// Whether the message has outlived its TTL at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age_seconds(now) > self.ttl_seconds
    }
}

/// Generate a time-ordered unique id: unix millis plus a random suffix
fn generate_message_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_message_defaults() {
        let msg = Message::new(MessageType::DataSync, serde_json::json!({"a": 1}));
        assert_eq!(msg.priority, MessagePriority::Normal);
        assert_eq!(msg.ttl_seconds, DEFAULT_TTL_SECONDS);
        assert_eq!(msg.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(msg.retry_count, 0);
        assert!(msg.source_region.is_none());
        assert!(msg.target_region.is_none());
    }

    #[test]
    fn test_message_id_format() {
        let msg = Message::new(MessageType::Heartbeat, serde_json::Value::Null);
        let (millis, suffix) = msg.id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().unwrap() > 1_700_000_000_000);
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::new(MessageType::Heartbeat, serde_json::Value::Null);
        let b = Message::new(MessageType::Heartbeat, serde_json::Value::Null);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_json_round_trip_is_lossless() {
        let msg = Message::new(
            MessageType::TradingSignal,
            serde_json::json!({"symbol": "BTCUSDT", "side": "buy"}),
        )
        .with_priority(MessagePriority::Critical)
        .with_target_region(Region::CN)
        .with_ttl(120);

        let round_tripped = Message::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(round_tripped, msg);
    }

    #[test]
    fn test_wire_field_names() {
        let mut msg = Message::new(MessageType::RiskAlert, serde_json::json!({}));
        msg.source_region = Some(Region::SG);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "risk_alert");
        assert_eq!(value["priority"], 2);
        assert_eq!(value["sourceRegion"], "SG");
        assert!(value.get("targetRegion").is_none());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["ttlSeconds"], 3600);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(MessagePriority::Critical > MessagePriority::High);
        assert!(MessagePriority::High > MessagePriority::Normal);
        assert!(MessagePriority::Normal > MessagePriority::Low);
        assert_eq!(u8::from(MessagePriority::Critical), 4);
    }

    #[test]
    fn test_priority_rejects_out_of_range() {
        assert!(MessagePriority::try_from(0).is_err());
        assert!(MessagePriority::try_from(5).is_err());
    }

    #[test]
    fn test_expiry() {
        let mut msg = Message::new(MessageType::DataSync, serde_json::json!({})).with_ttl(1);
        msg.created_at = Utc::now() - Duration::seconds(2);
        assert!(msg.is_expired(Utc::now()));

        let fresh = Message::new(MessageType::DataSync, serde_json::json!({}));
        assert!(!fresh.is_expired(Utc::now()));
    }

    #[test]
    fn test_region_peer() {
        assert_eq!(Region::SG.peer(), Region::CN);
        assert_eq!(Region::CN.peer(), Region::SG);
    }
}
