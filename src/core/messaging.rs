//! Regional messaging service
//!
//! Owns this region's broker connection and runs the delivery machinery:
//! idempotent consumer-group creation for all 24 (type, priority) streams,
//! outbound sends, a priority-biased receive loop, a heartbeat loop, a
//! retention trim routine, and the request/response correlator.
//!
//! Delivery is at-most-once: every claimed entry is acknowledged whether
//! or not dispatch succeeded, and no redelivery is ever scheduled. The
//! envelope's retry fields are carried on the wire but never inspected.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MessagingConfig;
use crate::error::{AppError, Result};

use super::broker::Broker;
use super::handler::{HandlerRegistry, MessageHandler};
use super::message::{Message, MessagePriority, MessageType, Region};
use super::streams::{all_streams, response_stream, stream_name, streams_for_priority};

/// Heartbeat messages expire quickly; a stale heartbeat is useless.
const HEARTBEAT_TTL_SECONDS: u64 = 60;

/// Read-only snapshot of the service counters
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub region: Region,
    pub is_running: bool,
    pub handler_type_count: usize,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Cross-region messaging service for one deployment
///
/// Constructed explicitly with a region and broker; collaborators hold it
/// as `Arc<MessagingService>` — there is no process-wide singleton.
pub struct MessagingService {
    region: Region,
    broker: Arc<dyn Broker>,
    config: MessagingConfig,
    consumer_group: String,
    consumer_name: String,
    registry: RwLock<HandlerRegistry>,
    running: AtomicBool,
    shutdown: CancellationToken,
    counters: Counters,
    last_activity: Mutex<Option<DateTime<Utc>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessagingService {
    pub fn new(region: Region, broker: Arc<dyn Broker>, config: MessagingConfig) -> Self {
        Self {
            region,
            broker,
            config,
            consumer_group: format!("{}_group", region),
            consumer_name: format!("{}_consumer_{}", region, std::process::id()),
            registry: RwLock::new(HandlerRegistry::new()),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            counters: Counters::default(),
            last_activity: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a handler for every type it supports
    ///
    /// Must be called before `start()`; the registry is read-only once
    /// the receive loop is running.
    pub fn register_handler(&self, handler: Arc<dyn MessageHandler>) {
        let types = handler.supported_types();
        self.registry
            .write()
            .expect("handler registry lock poisoned")
            .register(handler);
        info!(region = %self.region, types = ?types, "Registered message handler");
    }

    /// Create consumer groups and launch the receive and heartbeat loops
    ///
    /// Returns once the groups exist; does not block on the loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for stream in all_streams() {
            self.broker.create_group(&stream, &self.consumer_group).await?;
        }

        self.running.store(true, Ordering::SeqCst);

        let receive = Arc::clone(self);
        let heartbeat = Arc::clone(self);
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.push(tokio::spawn(async move { receive.receive_loop().await }));
        tasks.push(tokio::spawn(async move { heartbeat.heartbeat_loop().await }));

        info!(region = %self.region, consumer = %self.consumer_name, "Messaging service started");
        Ok(())
    }

    /// Cooperative shutdown: flips the running flag and waits for the loops
    ///
    /// Shutdown latency is bounded by the blocking-read timeout; an
    /// in-flight read completes on its own before the flag is observed.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("task list lock poisoned");
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!(region = %self.region, "Messaging service stopped");
    }

    /// Send a message to the peer region
    ///
    /// Stamps the source region and appends to the stream selected by
    /// (type, priority). Returns `false` on any failure instead of
    /// raising; sends never crash a caller.
    pub async fn send_message(&self, mut message: Message) -> bool {
        if !self.is_running() {
            warn!(id = %message.id, "Cannot send: service is not running");
            return false;
        }

        message.source_region = Some(self.region);
        let stream = stream_name(message.message_type, message.priority);

        let serialized = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(id = %message.id, error = %e, "Failed to serialize message");
                return false;
            }
        };

        if let Err(e) = self.broker.append(&stream, &serialized).await {
            error!(id = %message.id, stream = %stream, error = %e, "Failed to send message");
            return false;
        }

        // Replies carry the original request id in their payload; mirror
        // them onto the correlation stream so the waiting requester sees
        // them without consuming from the type streams.
        if let Some(request_id) = message.payload.get("requestId").and_then(|v| v.as_str()) {
            let correlation = response_stream(request_id);
            if let Err(e) = self.broker.append(&correlation, &serialized).await {
                warn!(id = %message.id, stream = %correlation, error = %e,
                    "Failed to mirror reply to correlation stream");
            }
        }

        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
        debug!(id = %message.id, stream = %stream, "Message sent");
        true
    }

    /// Send a request and wait for its correlated response payload
    ///
    /// Blocks only the caller; the receive loop keeps running. Fails with
    /// `AppError::Timeout` when no reply lands on the correlation stream
    /// within `timeout`.
    pub async fn request_response(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if !self.is_running() {
            return Err(AppError::NotRunning);
        }
        let correlation_id = message.id.clone();
        let stream = response_stream(&correlation_id);

        if !self.send_message(message).await {
            return Err(AppError::Broker(format!(
                "failed to send request {}",
                correlation_id
            )));
        }

        let deadline = Instant::now() + timeout;
        let mut last_id = "0".to_string();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(id = %correlation_id, "Request timed out");
                return Err(AppError::Timeout);
            }

            let block = remaining.min(self.config.response_poll());
            match self.broker.read_after(&stream, &last_id, block).await {
                Ok(Some(entry)) => match Message::from_json(&entry.payload) {
                    Ok(reply) => {
                        debug!(id = %correlation_id, reply_id = %reply.id, "Response received");
                        return Ok(reply.payload);
                    }
                    Err(e) => {
                        warn!(id = %correlation_id, error = %e, "Malformed response entry, skipping");
                        last_id = entry.id;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(id = %correlation_id, error = %e, "Response poll failed, retrying");
                }
            }
        }
    }

    /// Trim entries older than the retention window from every stream
    ///
    /// Maintenance operation, not part of per-message delivery.
    pub async fn trim_expired_messages(&self) -> u64 {
        let cutoff = (Utc::now() - self.config.retention_window()).timestamp_millis();
        let mut removed = 0;

        for stream in all_streams() {
            match self.broker.trim_older_than(&stream, cutoff).await {
                Ok(count) => removed += count,
                Err(e) => warn!(stream = %stream, error = %e, "Failed to trim stream"),
            }
        }

        info!(removed, "Expired stream entries trimmed");
        removed
    }

    /// Snapshot of the service counters
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            messages_sent: self.counters.sent.load(Ordering::Relaxed),
            messages_received: self.counters.received.load(Ordering::Relaxed),
            messages_processed: self.counters.processed.load(Ordering::Relaxed),
            messages_failed: self.counters.failed.load(Ordering::Relaxed),
            last_activity: *self.last_activity.lock().expect("activity lock poisoned"),
            region: self.region,
            is_running: self.is_running(),
            handler_type_count: self
                .registry
                .read()
                .expect("handler registry lock poisoned")
                .type_count(),
        }
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().expect("activity lock poisoned") = Some(Utc::now());
    }

    // =========================================================================
    // Receive loop
    // =========================================================================

    /// One pass visits all 24 streams, highest priority tier first.
    ///
    /// Priority is a bias, not a guarantee: every pass visits every
    /// stream, so low-priority work is never starved.
    async fn receive_loop(self: Arc<Self>) {
        info!(region = %self.region, "Receive loop started");

        'outer: while self.is_running() {
            for priority in MessagePriority::DESCENDING {
                for stream in streams_for_priority(priority) {
                    if !self.is_running() {
                        break 'outer;
                    }
                    self.poll_stream(&stream).await;
                }
            }
            sleep(self.config.pass_delay()).await;
        }

        info!(region = %self.region, "Receive loop stopped");
    }

    /// Claim at most one pending entry from a stream and process it
    async fn poll_stream(&self, stream: &str) {
        let entry = match self
            .broker
            .read_group(
                stream,
                &self.consumer_group,
                &self.consumer_name,
                self.config.block_timeout(),
            )
            .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                warn!(stream = %stream, error = %e, "Stream read failed");
                return;
            }
        };

        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();

        match Message::from_json(&entry.payload) {
            Ok(message) => self.dispatch(message).await,
            // Unparseable entries are still acknowledged below so they
            // cannot block the stream forever.
            Err(e) => warn!(stream = %stream, entry = %entry.id, error = %e,
                "Dropping undeserializable entry"),
        }

        // Acknowledge unconditionally: dispatch failure does not earn a
        // redelivery.
        if let Err(e) = self
            .broker
            .ack(stream, &self.consumer_group, &entry.id)
            .await
        {
            warn!(stream = %stream, entry = %entry.id, error = %e, "Ack failed");
        }
    }

    /// Run a received message through the handler chain
    async fn dispatch(&self, message: Message) {
        let now = Utc::now();
        if message.is_expired(now) {
            warn!(id = %message.id, age_secs = message.age_seconds(now),
                ttl_secs = message.ttl_seconds, "Message expired, dropping");
            return;
        }

        if let Some(target) = message.target_region {
            if target != self.region {
                debug!(id = %message.id, target = %target, "Message not for this region, skipping");
                return;
            }
        }

        let handlers = {
            let registry = self.registry.read().expect("handler registry lock poisoned");
            registry.handlers_for(message.message_type).to_vec()
        };
        if handlers.is_empty() {
            warn!(id = %message.id, message_type = %message.message_type,
                "No handler for message type");
            return;
        }

        let mut processed = false;
        for handler in handlers {
            match handler.handle(&message).await {
                Ok(true) => {
                    processed = true;
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(id = %message.id, error = %e, "Handler error");
                }
            }
        }

        if processed {
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(id = %message.id, message_type = %message.message_type,
                "Message processing failed");
        }
    }

    // =========================================================================
    // Heartbeat loop
    // =========================================================================

    /// Announce liveness and stats to the peer every heartbeat interval
    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.heartbeat_interval());
        // The first interval tick completes immediately; skip it so the
        // first heartbeat goes out one full interval after start.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.is_running() {
                break;
            }

            let heartbeat = Message::new(
                MessageType::Heartbeat,
                serde_json::json!({
                    "region": self.region,
                    "timestamp": Utc::now(),
                    "stats": self.stats(),
                }),
            )
            .with_priority(MessagePriority::Low)
            .with_ttl(HEARTBEAT_TTL_SECONDS);

            if !self.send_message(heartbeat).await {
                error!(region = %self.region, "Heartbeat send failed");
            }
        }
    }
}
