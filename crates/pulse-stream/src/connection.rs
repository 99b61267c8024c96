//! WebSocket connection registry
//!
//! Tracks every connection's lifecycle state machine, enforces per-user
//! connection caps, and cleans up idle or errored connections on a timer.
//! Outbound frames travel through a per-connection channel owned by the
//! socket task.

use crate::protocol::StreamMessage;
use pulse_core::config::StreamingSettings;
use pulse_core::error::{TelemetryError, TelemetryResult};
use pulse_core::metrics::SharedMetrics;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Connection lifecycle state
///
/// connecting -> connected -> authenticated -> subscribed ->
/// disconnecting -> disconnected, with error as an absorbing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Authenticated,
    Subscribed,
    Disconnecting,
    Disconnected,
    Error,
}

/// Per-connection bookkeeping
pub struct ConnectionInfo {
    pub id: String,
    pub user_id: Option<String>,
    pub state: ConnectionState,
    pub subscriptions: HashSet<String>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    sender: mpsc::Sender<StreamMessage>,
}

/// The connection registry
pub struct ConnectionManager {
    settings: StreamingSettings,
    connections: RwLock<HashMap<String, ConnectionInfo>>,
    user_connections: RwLock<HashMap<String, HashSet<String>>>,
    metrics: SharedMetrics,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(settings: StreamingSettings, metrics: SharedMetrics) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            settings,
            connections: RwLock::new(HashMap::new()),
            user_connections: RwLock::new(HashMap::new()),
            metrics,
            shutdown_tx,
        })
    }

    /// Start the periodic idle/error cleanup task
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                manager.settings.cleanup_interval_seconds.max(1),
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.cleanup().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    /// Signal shutdown to the cleanup task
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Register a new connection, returning its id
    pub async fn register(&self, sender: mpsc::Sender<StreamMessage>) -> String {
        let id = Ulid::new().to_string();
        let now = Instant::now();
        let info = ConnectionInfo {
            id: id.clone(),
            user_id: None,
            state: ConnectionState::Connected,
            subscriptions: HashSet::new(),
            connected_at: now,
            last_activity: now,
            messages_sent: 0,
            messages_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            sender,
        };
        self.connections.write().await.insert(id.clone(), info);
        self.metrics
            .streaming
            .connections_opened
            .fetch_add(1, Ordering::Relaxed);
        debug!("Connection {id} registered");
        id
    }

    /// Promote a connection to authenticated, enforcing the per-user cap
    pub async fn authenticate(&self, conn_id: &str, user_id: &str) -> TelemetryResult<()> {
        let mut users = self.user_connections.write().await;
        let owned = users.entry(user_id.to_string()).or_default();
        if !owned.contains(conn_id) && owned.len() >= self.settings.max_connections_per_user {
            return Err(TelemetryError::Resource {
                resource: "connections".to_string(),
                message: format!(
                    "user {user_id} at the cap of {} connections",
                    self.settings.max_connections_per_user
                ),
            });
        }

        let mut connections = self.connections.write().await;
        let info = connections
            .get_mut(conn_id)
            .ok_or_else(|| TelemetryError::Validation {
                field: "connection_id".to_string(),
                message: format!("unknown connection {conn_id}"),
            })?;
        info.user_id = Some(user_id.to_string());
        info.state = ConnectionState::Authenticated;
        info.last_activity = Instant::now();
        owned.insert(conn_id.to_string());
        info!("Connection {conn_id} authenticated as {user_id}");
        Ok(())
    }

    /// Whether the connection is authenticated (or further along)
    pub async fn is_authenticated(&self, conn_id: &str) -> bool {
        self.connections
            .read()
            .await
            .get(conn_id)
            .map(|c| {
                matches!(
                    c.state,
                    ConnectionState::Authenticated | ConnectionState::Subscribed
                )
            })
            .unwrap_or(false)
    }

    /// Record a subscription on the connection side
    pub async fn add_subscription(&self, conn_id: &str, stream_id: &str) -> TelemetryResult<()> {
        let mut connections = self.connections.write().await;
        let info = connections
            .get_mut(conn_id)
            .ok_or_else(|| TelemetryError::Validation {
                field: "connection_id".to_string(),
                message: format!("unknown connection {conn_id}"),
            })?;
        info.subscriptions.insert(stream_id.to_string());
        info.state = ConnectionState::Subscribed;
        info.last_activity = Instant::now();
        Ok(())
    }

    /// Remove a subscription on the connection side
    pub async fn remove_subscription(&self, conn_id: &str, stream_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(info) = connections.get_mut(conn_id) {
            info.subscriptions.remove(stream_id);
            if info.subscriptions.is_empty() && info.state == ConnectionState::Subscribed {
                info.state = ConnectionState::Authenticated;
            }
            info.last_activity = Instant::now();
        }
    }

    /// The connection's current subscription set
    pub async fn subscriptions(&self, conn_id: &str) -> HashSet<String> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .map(|c| c.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Send one frame to a connection, updating its counters
    ///
    /// Delivery counters only move when the frame actually entered the
    /// outbound channel.
    pub async fn send_to(&self, conn_id: &str, message: StreamMessage) -> TelemetryResult<()> {
        let size = message.encoded_len() as u64;
        let sender = {
            let connections = self.connections.read().await;
            let info = connections
                .get(conn_id)
                .ok_or_else(|| TelemetryError::Validation {
                    field: "connection_id".to_string(),
                    message: format!("unknown connection {conn_id}"),
                })?;
            info.sender.clone()
        };

        match sender.try_send(message) {
            Ok(()) => {
                if let Some(info) = self.connections.write().await.get_mut(conn_id) {
                    info.messages_sent += 1;
                    info.bytes_sent += size;
                }
                self.metrics
                    .streaming
                    .messages_sent
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .streaming
                    .bytes_sent
                    .fetch_add(size, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                // A slow consumer loses frames rather than stalling the
                // publisher
                self.metrics
                    .streaming
                    .messages_dropped
                    .fetch_add(1, Ordering::Relaxed);
                Err(TelemetryError::Network {
                    endpoint: format!("connection {conn_id}"),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Record inbound traffic and bump the activity clock
    pub async fn record_received(&self, conn_id: &str, bytes: usize) {
        let mut connections = self.connections.write().await;
        if let Some(info) = connections.get_mut(conn_id) {
            info.messages_received += 1;
            info.bytes_received += bytes as u64;
            info.last_activity = Instant::now();
        }
    }

    /// Mark a connection errored; the cleanup task will reap it
    pub async fn mark_error(&self, conn_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(info) = connections.get_mut(conn_id) {
            info.state = ConnectionState::Error;
        }
    }

    /// Remove a connection, returning the streams it was subscribed to
    pub async fn remove(&self, conn_id: &str) -> HashSet<String> {
        let removed = self.connections.write().await.remove(conn_id);
        let Some(info) = removed else {
            return HashSet::new();
        };

        if let Some(user_id) = &info.user_id {
            let mut users = self.user_connections.write().await;
            if let Some(owned) = users.get_mut(user_id) {
                owned.remove(conn_id);
                if owned.is_empty() {
                    users.remove(user_id);
                }
            }
        }
        self.metrics
            .streaming
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
        info!("Connection {conn_id} removed");
        info.subscriptions
    }

    /// Reap idle and errored connections
    pub async fn cleanup(&self) -> Vec<String> {
        let idle_after = Duration::from_secs(self.settings.idle_timeout_seconds);
        let now = Instant::now();
        let stale: Vec<String> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|c| {
                    c.state == ConnectionState::Error
                        || now.duration_since(c.last_activity) > idle_after
                })
                .map(|c| c.id.clone())
                .collect()
        };
        for conn_id in &stale {
            warn!("Reaping stale connection {conn_id}");
            self.remove(conn_id).await;
        }
        stale
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Registry snapshot for the stats API
    pub async fn to_json(&self) -> serde_json::Value {
        let connections = self.connections.read().await;
        let entries: Vec<serde_json::Value> = connections
            .values()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "user_id": c.user_id,
                    "state": c.state,
                    "subscriptions": c.subscriptions.iter().collect::<Vec<_>>(),
                    "uptime_seconds": c.connected_at.elapsed().as_secs(),
                    "messages_sent": c.messages_sent,
                    "messages_received": c.messages_received,
                    "bytes_sent": c.bytes_sent,
                    "bytes_received": c.bytes_received,
                })
            })
            .collect();
        serde_json::json!({
            "count": entries.len(),
            "connections": entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::metrics::create_metrics;

    fn manager() -> Arc<ConnectionManager> {
        ConnectionManager::new(StreamingSettings::default(), create_metrics())
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(8);
        let conn = manager.register(tx).await;

        assert!(!manager.is_authenticated(&conn).await);
        manager.authenticate(&conn, "alice").await.unwrap();
        assert!(manager.is_authenticated(&conn).await);
    }

    #[tokio::test]
    async fn test_per_user_connection_cap() {
        let settings = StreamingSettings {
            max_connections_per_user: 2,
            ..StreamingSettings::default()
        };
        let manager = ConnectionManager::new(settings, create_metrics());

        let mut conns = Vec::new();
        for _ in 0..2 {
            let (tx, _rx) = mpsc::channel(8);
            let conn = manager.register(tx).await;
            manager.authenticate(&conn, "alice").await.unwrap();
            conns.push(conn);
        }

        let (tx, _rx) = mpsc::channel(8);
        let third = manager.register(tx).await;
        let err = manager.authenticate(&third, "alice").await.unwrap_err();
        assert_eq!(err.code(), "resource");

        // Removing one frees a slot
        manager.remove(&conns[0]).await;
        manager.authenticate(&third, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_updates_counters() {
        let manager = manager();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = manager.register(tx).await;

        manager
            .send_to(&conn, StreamMessage::heartbeat())
            .await
            .unwrap();
        assert!(rx.recv().await.is_some());

        let json = manager.to_json().await;
        assert_eq!(json["connections"][0]["messages_sent"], 1);
        assert!(json["connections"][0]["bytes_sent"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_dropped_frame_leaves_delivery_counters_alone() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(1);
        let conn = manager.register(tx).await;

        // Fill the outbound channel, then overflow it
        manager
            .send_to(&conn, StreamMessage::heartbeat())
            .await
            .unwrap();
        let err = manager
            .send_to(&conn, StreamMessage::heartbeat())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "network");

        let json = manager.to_json().await;
        assert_eq!(json["connections"][0]["messages_sent"], 1);
    }

    #[tokio::test]
    async fn test_full_consumer_drops_frame() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(1);
        let conn = manager.register(tx).await;

        manager
            .send_to(&conn, StreamMessage::heartbeat())
            .await
            .unwrap();
        let err = manager
            .send_to(&conn, StreamMessage::heartbeat())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "network");
    }

    #[tokio::test]
    async fn test_cleanup_reaps_errored() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(8);
        let conn = manager.register(tx).await;

        manager.mark_error(&conn).await;
        let reaped = manager.cleanup().await;
        assert_eq!(reaped, vec![conn]);
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_subscription_state_transitions() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(8);
        let conn = manager.register(tx).await;
        manager.authenticate(&conn, "alice").await.unwrap();

        manager.add_subscription(&conn, "telemetry").await.unwrap();
        assert!(manager.subscriptions(&conn).await.contains("telemetry"));

        manager.remove_subscription(&conn, "telemetry").await;
        assert!(manager.subscriptions(&conn).await.is_empty());
        assert!(manager.is_authenticated(&conn).await);
    }
}
