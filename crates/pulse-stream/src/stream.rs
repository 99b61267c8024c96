//! Data streams
//!
//! Each stream owns a fixed-capacity circular buffer (oldest overwritten)
//! and a pending batch flushed when it reaches `batch_size` or when the
//! flush timer fires. Flushed batches go out as one data frame per
//! subscriber.

use crate::connection::ConnectionManager;
use crate::protocol::StreamMessage;
use pulse_core::config::StreamingSettings;
use pulse_core::error::{TelemetryError, TelemetryResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Streaming configuration
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub buffer_size: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_subscribers: usize,
    pub snapshot_size: usize,
}

impl From<&StreamingSettings> for StreamingConfig {
    fn from(settings: &StreamingSettings) -> Self {
        Self {
            buffer_size: settings.buffer_size,
            batch_size: settings.batch_size,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            max_subscribers: settings.max_subscribers,
            snapshot_size: settings.snapshot_size,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self::from(&StreamingSettings::default())
    }
}

/// Per-stream delivery counters
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct StreamStats {
    pub published: u64,
    pub batches_sent: u64,
    pub dropped: u64,
    pub errors: u64,
}

/// One stream's state
struct DataStream {
    id: String,
    buffer: VecDeque<serde_json::Value>,
    pending: Vec<serde_json::Value>,
    subscribers: HashSet<String>,
    stats: StreamStats,
}

impl DataStream {
    fn new(id: String) -> Self {
        Self {
            id,
            buffer: VecDeque::new(),
            pending: Vec::new(),
            subscribers: HashSet::new(),
            stats: StreamStats::default(),
        }
    }

    /// Buffer a value, overwriting the oldest when at capacity
    fn push(&mut self, value: serde_json::Value, capacity: usize) {
        if self.buffer.len() >= capacity {
            self.buffer.pop_front();
            self.stats.dropped += 1;
        }
        self.buffer.push_back(value.clone());
        self.pending.push(value);
        self.stats.published += 1;
    }

    /// Most recent buffered values, oldest first
    fn snapshot(&self, n: usize) -> Vec<serde_json::Value> {
        self.buffer.iter().rev().take(n).rev().cloned().collect()
    }
}

/// Registry of data streams, shared with the subscription handler
pub struct StreamManager {
    config: StreamingConfig,
    streams: RwLock<HashMap<String, DataStream>>,
    connections: Arc<ConnectionManager>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamManager {
    /// The pipeline output streams every deployment carries
    pub const DEFAULT_STREAMS: [&'static str; 3] = ["telemetry", "correlations", "analysis"];

    pub fn new(config: StreamingConfig, connections: Arc<ConnectionManager>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let mut streams = HashMap::new();
        for id in Self::DEFAULT_STREAMS {
            streams.insert(id.to_string(), DataStream::new(id.to_string()));
        }
        Arc::new(Self {
            config,
            streams: RwLock::new(streams),
            connections,
            shutdown_tx,
        })
    }

    /// Start the periodic flush task
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => manager.flush_all().await,
                    _ = shutdown_rx.changed() => {
                        manager.flush_all().await;
                        break;
                    }
                }
            }
            info!("Stream flush task stopped");
        });
    }

    /// Signal shutdown to the flush task
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Create a stream if it does not already exist
    pub async fn create_stream(&self, stream_id: &str) {
        let mut streams = self.streams.write().await;
        streams
            .entry(stream_id.to_string())
            .or_insert_with(|| DataStream::new(stream_id.to_string()));
    }

    /// Whether the stream exists
    pub async fn has_stream(&self, stream_id: &str) -> bool {
        self.streams.read().await.contains_key(stream_id)
    }

    /// Publish one value to a stream; flushes early when the pending
    /// batch reaches the configured size
    pub async fn publish(&self, stream_id: &str, value: serde_json::Value) -> TelemetryResult<()> {
        let flush_now = {
            let mut streams = self.streams.write().await;
            let stream = streams
                .get_mut(stream_id)
                .ok_or_else(|| TelemetryError::Validation {
                    field: "stream_id".to_string(),
                    message: format!("unknown stream {stream_id}"),
                })?;
            stream.push(value, self.config.buffer_size);
            stream.pending.len() >= self.config.batch_size
        };
        if flush_now {
            self.flush(stream_id).await;
        }
        Ok(())
    }

    /// Subscribe a connection, bounded by `max_subscribers`
    pub async fn subscribe(&self, stream_id: &str, conn_id: &str) -> TelemetryResult<()> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream_id)
            .ok_or_else(|| TelemetryError::Validation {
                field: "stream_id".to_string(),
                message: format!("unknown stream {stream_id}"),
            })?;
        if !stream.subscribers.contains(conn_id)
            && stream.subscribers.len() >= self.config.max_subscribers
        {
            return Err(TelemetryError::Resource {
                resource: format!("stream {stream_id}"),
                message: format!("at the cap of {} subscribers", self.config.max_subscribers),
            });
        }
        stream.subscribers.insert(conn_id.to_string());
        debug!("Connection {conn_id} subscribed to {stream_id}");
        Ok(())
    }

    /// Unsubscribe a connection
    pub async fn unsubscribe(&self, stream_id: &str, conn_id: &str) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(stream_id) {
            stream.subscribers.remove(conn_id);
        }
    }

    /// Remove a connection from every stream it appears in
    pub async fn unsubscribe_all(&self, conn_id: &str) {
        let mut streams = self.streams.write().await;
        for stream in streams.values_mut() {
            stream.subscribers.remove(conn_id);
        }
    }

    /// The stream's subscriber set
    pub async fn subscribers(&self, stream_id: &str) -> HashSet<String> {
        self.streams
            .read()
            .await
            .get(stream_id)
            .map(|s| s.subscribers.clone())
            .unwrap_or_default()
    }

    /// Recent buffered values for a new subscriber's snapshot
    pub async fn snapshot(&self, stream_id: &str) -> Vec<serde_json::Value> {
        self.streams
            .read()
            .await
            .get(stream_id)
            .map(|s| s.snapshot(self.config.snapshot_size))
            .unwrap_or_default()
    }

    /// Flush one stream's pending batch to its subscribers, preserving
    /// insertion order
    pub async fn flush(&self, stream_id: &str) {
        let (batch, subscribers) = {
            let mut streams = self.streams.write().await;
            let Some(stream) = streams.get_mut(stream_id) else {
                return;
            };
            if stream.pending.is_empty() {
                return;
            }
            let batch = std::mem::take(&mut stream.pending);
            stream.stats.batches_sent += 1;
            (batch, stream.subscribers.clone())
        };

        let message = StreamMessage::data(stream_id, serde_json::Value::Array(batch));
        for conn_id in subscribers {
            if let Err(e) = self.connections.send_to(&conn_id, message.clone()).await {
                warn!("Delivery to {conn_id} failed: {e}");
                let mut streams = self.streams.write().await;
                if let Some(stream) = streams.get_mut(stream_id) {
                    stream.stats.errors += 1;
                }
            }
        }
    }

    async fn flush_all(&self) {
        let ids: Vec<String> = self.streams.read().await.keys().cloned().collect();
        for id in ids {
            self.flush(&id).await;
        }
    }

    /// Stream registry snapshot for the stats API
    pub async fn to_json(&self) -> serde_json::Value {
        let streams = self.streams.read().await;
        let entries: Vec<serde_json::Value> = streams
            .values()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "buffered": s.buffer.len(),
                    "pending": s.pending.len(),
                    "subscribers": s.subscribers.len(),
                    "stats": s.stats,
                })
            })
            .collect();
        serde_json::json!({ "streams": entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::metrics::create_metrics;
    use pulse_core::config::StreamingSettings;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn setup(config: StreamingConfig) -> (Arc<StreamManager>, Arc<ConnectionManager>) {
        let connections = ConnectionManager::new(StreamingSettings::default(), create_metrics());
        let streams = StreamManager::new(config, connections.clone());
        (streams, connections)
    }

    #[tokio::test]
    async fn test_batch_flushes_at_size() {
        let config = StreamingConfig {
            batch_size: 3,
            ..StreamingConfig::default()
        };
        let (streams, connections) = setup(config).await;

        let (tx, mut rx) = mpsc::channel(8);
        let conn = connections.register(tx).await;
        streams.subscribe("telemetry", &conn).await.unwrap();

        for i in 0..3 {
            streams
                .publish("telemetry", json!({"seq": i}))
                .await
                .unwrap();
        }

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.stream_id.as_deref(), Some("telemetry"));
        let batch = frame.data.as_array().unwrap();
        assert_eq!(batch.len(), 3);
        // Flush preserves insertion order
        assert_eq!(batch[0]["seq"], 0);
        assert_eq!(batch[2]["seq"], 2);
    }

    #[tokio::test]
    async fn test_circular_buffer_overwrites_oldest() {
        let config = StreamingConfig {
            buffer_size: 3,
            batch_size: 100,
            snapshot_size: 10,
            ..StreamingConfig::default()
        };
        let (streams, _connections) = setup(config).await;

        for i in 0..5 {
            streams
                .publish("telemetry", json!({"seq": i}))
                .await
                .unwrap();
        }

        let snapshot = streams.snapshot("telemetry").await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0]["seq"], 2);
        assert_eq!(snapshot[2]["seq"], 4);
    }

    #[tokio::test]
    async fn test_subscriber_cap() {
        let config = StreamingConfig {
            max_subscribers: 1,
            ..StreamingConfig::default()
        };
        let (streams, _connections) = setup(config).await;

        streams.subscribe("telemetry", "c1").await.unwrap();
        let err = streams.subscribe("telemetry", "c2").await.unwrap_err();
        assert_eq!(err.code(), "resource");

        // Re-subscribing the existing connection is not a new slot
        streams.subscribe("telemetry", "c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_to_unknown_stream_fails() {
        let (streams, _connections) = setup(StreamingConfig::default()).await;
        let err = streams.publish("nope", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn test_unsubscribe_all_clears_everywhere() {
        let (streams, _connections) = setup(StreamingConfig::default()).await;
        streams.subscribe("telemetry", "c1").await.unwrap();
        streams.subscribe("analysis", "c1").await.unwrap();

        streams.unsubscribe_all("c1").await;
        assert!(streams.subscribers("telemetry").await.is_empty());
        assert!(streams.subscribers("analysis").await.is_empty());
    }
}
