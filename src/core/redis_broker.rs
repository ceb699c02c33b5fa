//! Redis Streams broker
//!
//! Implements the `Broker` contract over a regional Redis instance:
//! XADD / XGROUP CREATE MKSTREAM / XREADGROUP / XACK / XREAD / XTRIM MINID.
//! Each region connects only to its own instance; cross-region visibility
//! is provisioned at the broker level (geo-replication), outside this crate.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::error::{AppError, Result};

use super::broker::{Broker, StreamEntry};

/// Field under which the serialized envelope is stored in a stream entry
const MESSAGE_FIELD: &str = "message";

pub struct RedisBroker {
    connection: MultiplexedConnection,
}

impl RedisBroker {
    /// Connect to a regional Redis instance and verify it with PING
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;
        let connection = client.get_multiplexed_async_connection().await?;

        let mut conn = connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(host = %config.host, port = config.port, db = config.db, "Connected to Redis");

        Ok(Self { connection })
    }

    fn extract_entry(reply: StreamReadReply) -> Result<Option<StreamEntry>> {
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let payload: String = entry.get(MESSAGE_FIELD).ok_or_else(|| {
                    AppError::Broker(format!(
                        "stream entry {} is missing the '{}' field",
                        entry.id, MESSAGE_FIELD
                    ))
                })?;
                return Ok(Some(StreamEntry {
                    id: entry.id,
                    payload,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn append(&self, stream: &str, payload: &str) -> Result<String> {
        let mut conn = self.connection.clone();
        let id: String = conn.xadd(stream, "*", &[(MESSAGE_FIELD, payload)]).await?;
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let created: redis::RedisResult<String> =
            conn.xgroup_create_mkstream(stream, group, "$").await;

        match created {
            Ok(_) => Ok(()),
            // Group already exists; its read position is untouched.
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream, group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<StreamEntry>> {
        let mut conn = self.connection.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(1)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = conn.xread_options(&[stream], &[">"], &options).await?;
        Self::extract_entry(reply)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.xack(stream, group, &[entry_id]).await?;
        Ok(())
    }

    async fn read_after(
        &self,
        stream: &str,
        last_id: &str,
        block: Duration,
    ) -> Result<Option<StreamEntry>> {
        let mut conn = self.connection.clone();
        let options = StreamReadOptions::default()
            .count(1)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = conn.xread_options(&[stream], &[last_id], &options).await?;
        Self::extract_entry(reply)
    }

    async fn trim_older_than(&self, stream: &str, cutoff_ms: i64) -> Result<u64> {
        let mut conn = self.connection.clone();
        // MINID trimming is not exposed by the typed API in redis 0.24.
        let removed: u64 = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MINID")
            .arg(cutoff_ms)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }
}
