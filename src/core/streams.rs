//! Stream router
//!
//! Maps (message type, priority) pairs to physical broker stream names.
//! Pure functions: one stream per combination (6 types x 4 priorities = 24),
//! created lazily at service start, never deleted, only trimmed by age.

use super::message::{MessagePriority, MessageType};

/// Stream name for a (type, priority) pair, e.g. `data_sync_normal`
pub fn stream_name(message_type: MessageType, priority: MessagePriority) -> String {
    format!("{}_{}", message_type.as_str(), priority.as_str())
}

/// The 6 type streams at one priority, in fixed `MessageType::ALL` order
pub fn streams_for_priority(priority: MessagePriority) -> Vec<String> {
    MessageType::ALL
        .iter()
        .map(|t| stream_name(*t, priority))
        .collect()
}

/// All 24 streams, used for consumer-group creation and retention trims
pub fn all_streams() -> Vec<String> {
    MessagePriority::DESCENDING
        .iter()
        .flat_map(|p| streams_for_priority(*p))
        .collect()
}

/// Response stream for a request id (request/response correlation)
pub fn response_stream(message_id: &str) -> String {
    format!("response_{}_response", message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name() {
        assert_eq!(
            stream_name(MessageType::DataSync, MessagePriority::Normal),
            "data_sync_normal"
        );
        assert_eq!(
            stream_name(MessageType::RiskAlert, MessagePriority::Critical),
            "risk_alert_critical"
        );
    }

    #[test]
    fn test_streams_for_priority() {
        let streams = streams_for_priority(MessagePriority::High);
        assert_eq!(streams.len(), 6);
        assert_eq!(streams[0], "data_sync_high");
        assert_eq!(streams[5], "heartbeat_high");
    }

    #[test]
    fn test_all_streams_is_24_unique() {
        let streams = all_streams();
        assert_eq!(streams.len(), 24);
        let unique: std::collections::HashSet<_> = streams.iter().collect();
        assert_eq!(unique.len(), 24);
        // Critical streams come first: the receive loop iterates this order.
        assert!(streams[0].ends_with("_critical"));
        assert!(streams[23].ends_with("_low"));
    }

    #[test]
    fn test_response_stream() {
        assert_eq!(response_stream("123-abc"), "response_123-abc_response");
    }
}
