//! Broker contract
//!
//! The messaging core only relies on a small log-structured broker
//! surface: append, idempotent consumer-group creation, claim-one-pending
//! reads with a bounded blocking wait, acknowledgment, and trim-by-age.
//! Redis Streams satisfies this (see `redis_broker`); `InMemoryBroker`
//! provides the same semantics in-process for tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::error::Result;

/// One entry read from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Broker-assigned id; leading component is a unix-millis timestamp
    pub id: String,
    /// Serialized message envelope
    pub payload: String,
}

/// Minimal log-structured broker surface used by the messaging core
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a payload to a stream, returning the assigned entry id
    async fn append(&self, stream: &str, payload: &str) -> Result<String>;

    /// Create a consumer group positioned at the end of the stream
    ///
    /// Idempotent: an already-existing group is not an error and its read
    /// position is left untouched.
    async fn create_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Claim at most one pending entry for `consumer`, waiting up to `block`
    ///
    /// A claimed entry is owned by that consumer until acknowledged, so
    /// multiple consumers in one group never double-process an entry.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<StreamEntry>>;

    /// Acknowledge a claimed entry
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()>;

    /// Plain (group-less) read of the first entry after `last_id`
    ///
    /// `last_id = "0"` reads from the start of the stream. Used by the
    /// request/response correlator.
    async fn read_after(
        &self,
        stream: &str,
        last_id: &str,
        block: Duration,
    ) -> Result<Option<StreamEntry>>;

    /// Remove entries whose id timestamp is below `cutoff_ms`
    async fn trim_older_than(&self, stream: &str, cutoff_ms: i64) -> Result<u64>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next undelivered entry
    cursor: usize,
    /// Delivered but not yet acknowledged entry ids
    pending: HashSet<String>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: HashMap<String, StreamLog>,
    seq: u64,
}

/// In-process broker with consumer-group semantics
///
/// Shared by cloning; all clones see the same streams. Two regional
/// services on one `InMemoryBroker` model the geo-replicated deployment.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

/// Poll granularity for blocking reads
const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_millis(entry_id: &str) -> i64 {
        entry_id
            .split('-')
            .next()
            .and_then(|ms| ms.parse().ok())
            .unwrap_or(0)
    }

    async fn try_read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
    ) -> Option<StreamEntry> {
        let mut state = self.state.lock().await;
        let log = state.streams.get_mut(stream)?;
        let group_state = log.groups.get_mut(group)?;

        if group_state.cursor < log.entries.len() {
            let entry = log.entries[group_state.cursor].clone();
            group_state.cursor += 1;
            group_state.pending.insert(entry.id.clone());
            Some(entry)
        } else {
            None
        }
    }

    async fn try_read_after(&self, stream: &str, last_id: &str) -> Option<StreamEntry> {
        let state = self.state.lock().await;
        let log = state.streams.get(stream)?;

        if last_id == "0" {
            return log.entries.first().cloned();
        }
        let pos = log.entries.iter().position(|e| e.id == last_id)?;
        log.entries.get(pos + 1).cloned()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn append(&self, stream: &str, payload: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.seq += 1;
        let id = format!("{}-{}", Utc::now().timestamp_millis(), state.seq);
        let log = state.streams.entry(stream.to_string()).or_default();
        log.entries.push(StreamEntry {
            id: id.clone(),
            payload: payload.to_string(),
        });
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let log = state.streams.entry(stream.to_string()).or_default();
        let end = log.entries.len();
        // Existing groups keep their cursor (BUSYGROUP is not an error).
        log.groups.entry(group.to_string()).or_insert(GroupState {
            cursor: end,
            pending: HashSet::new(),
        });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            if let Some(entry) = self.try_read_group(stream, group, consumer).await {
                return Ok(Some(entry));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(log) = state.streams.get_mut(stream) {
            if let Some(group_state) = log.groups.get_mut(group) {
                group_state.pending.remove(entry_id);
            }
        }
        Ok(())
    }

    async fn read_after(
        &self,
        stream: &str,
        last_id: &str,
        block: Duration,
    ) -> Result<Option<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            if let Some(entry) = self.try_read_after(stream, last_id).await {
                return Ok(Some(entry));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn trim_older_than(&self, stream: &str, cutoff_ms: i64) -> Result<u64> {
        let mut state = self.state.lock().await;
        let Some(log) = state.streams.get_mut(stream) else {
            return Ok(0);
        };

        let keep_from = log
            .entries
            .iter()
            .position(|e| Self::entry_millis(&e.id) >= cutoff_ms)
            .unwrap_or(log.entries.len());
        if keep_from == 0 {
            return Ok(0);
        }

        log.entries.drain(..keep_from);
        for group_state in log.groups.values_mut() {
            group_state.cursor = group_state.cursor.saturating_sub(keep_from);
        }
        Ok(keep_from as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_append_and_group_read() {
        let broker = InMemoryBroker::new();
        broker.create_group("s", "g").await.unwrap();
        let id = broker.append("s", "hello").await.unwrap();

        let entry = broker.read_group("s", "g", "c1", BLOCK).await.unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.payload, "hello");

        // Entry is claimed: nothing further pending.
        assert!(broker.read_group("s", "g", "c2", BLOCK).await.unwrap().is_none());
        broker.ack("s", "g", &entry.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_group_created_at_end_of_stream() {
        let broker = InMemoryBroker::new();
        broker.append("s", "before").await.unwrap();
        broker.create_group("s", "g").await.unwrap();
        broker.append("s", "after").await.unwrap();

        let entry = broker.read_group("s", "g", "c", BLOCK).await.unwrap().unwrap();
        assert_eq!(entry.payload, "after");
    }

    #[tokio::test]
    async fn test_create_group_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.create_group("s", "g").await.unwrap();
        broker.append("s", "one").await.unwrap();

        // Second creation must not reset the cursor past "one".
        broker.create_group("s", "g").await.unwrap();
        let entry = broker.read_group("s", "g", "c", BLOCK).await.unwrap().unwrap();
        assert_eq!(entry.payload, "one");
    }

    #[tokio::test]
    async fn test_separate_groups_have_independent_cursors() {
        let broker = InMemoryBroker::new();
        broker.create_group("s", "sg_group").await.unwrap();
        broker.create_group("s", "cn_group").await.unwrap();
        broker.append("s", "m").await.unwrap();

        let a = broker.read_group("s", "sg_group", "c", BLOCK).await.unwrap();
        let b = broker.read_group("s", "cn_group", "c", BLOCK).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
        assert_eq!(a.unwrap().payload, b.unwrap().payload);
    }

    #[tokio::test]
    async fn test_read_after() {
        let broker = InMemoryBroker::new();
        let first = broker.append("s", "one").await.unwrap();
        broker.append("s", "two").await.unwrap();

        let entry = broker.read_after("s", "0", BLOCK).await.unwrap().unwrap();
        assert_eq!(entry.payload, "one");
        let next = broker.read_after("s", &first, BLOCK).await.unwrap().unwrap();
        assert_eq!(next.payload, "two");
        assert!(broker.read_after("s", &next.id, BLOCK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocking_read_times_out() {
        let broker = InMemoryBroker::new();
        broker.create_group("s", "g").await.unwrap();

        let started = Instant::now();
        let entry = broker.read_group("s", "g", "c", BLOCK).await.unwrap();
        assert!(entry.is_none());
        assert!(started.elapsed() >= BLOCK);
    }

    #[tokio::test]
    async fn test_blocking_read_sees_late_append() {
        let broker = InMemoryBroker::new();
        broker.create_group("s", "g").await.unwrap();

        let reader = broker.clone();
        let handle = tokio::spawn(async move {
            reader.read_group("s", "g", "c", Duration::from_millis(500)).await
        });
        sleep(Duration::from_millis(30)).await;
        broker.append("s", "late").await.unwrap();

        let entry = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(entry.payload, "late");
    }

    #[tokio::test]
    async fn test_trim_older_than() {
        let broker = InMemoryBroker::new();
        broker.create_group("s", "g").await.unwrap();
        broker.append("s", "old").await.unwrap();
        broker.append("s", "new").await.unwrap();

        let cutoff = Utc::now().timestamp_millis() + 1;
        let removed = broker.trim_older_than("s", cutoff).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(broker.trim_older_than("s", cutoff).await.unwrap(), 0);
        assert!(broker.trim_older_than("missing", cutoff).await.unwrap() == 0);
    }
}
