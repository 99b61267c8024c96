//! Subscription protocol handler
//!
//! Sits between the raw socket task and the stream/connection registries.
//! The socket task feeds inbound frames through [`StreamHandler::handle_message`]
//! and forwards whatever frames come back.

use crate::backpressure::MessageProcessor;
use crate::connection::ConnectionManager;
use crate::protocol::{MessageType, StreamMessage};
use crate::stream::StreamManager;
use async_trait::async_trait;
use pulse_core::error::TelemetryResult;
use pulse_core::pipeline::PipelineOutput;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Validates client auth tokens
#[async_trait]
pub trait AuthValidator: Send + Sync {
    /// Return the authenticated user id, or `None` to reject
    async fn validate(&self, token: &str) -> Option<String>;
}

/// Shared-token validation: any client presenting the configured token
/// authenticates, with the user id carried alongside it
///
/// Suitable for single-tenant deployments; anything multi-tenant should
/// inject a real validator.
pub struct TokenAuth {
    token: String,
}

impl TokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl AuthValidator for TokenAuth {
    async fn validate(&self, token: &str) -> Option<String> {
        // Token format: "<shared-secret>:<user-id>"
        let (secret, user) = token.split_once(':')?;
        if secret == self.token && !user.is_empty() {
            Some(user.to_string())
        } else {
            None
        }
    }
}

/// The subscription handler
pub struct StreamHandler {
    streams: Arc<StreamManager>,
    connections: Arc<ConnectionManager>,
    auth: Arc<dyn AuthValidator>,
    max_message_size: usize,
}

impl StreamHandler {
    pub fn new(
        streams: Arc<StreamManager>,
        connections: Arc<ConnectionManager>,
        auth: Arc<dyn AuthValidator>,
        max_message_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            streams,
            connections,
            auth,
            max_message_size,
        })
    }

    /// Register a new socket, returning its connection id
    pub async fn connect(&self, sender: mpsc::Sender<StreamMessage>) -> String {
        self.connections.register(sender).await
    }

    /// Tear down a connection and all of its subscriptions
    pub async fn disconnect(&self, conn_id: &str) {
        self.streams.unsubscribe_all(conn_id).await;
        self.connections.remove(conn_id).await;
    }

    /// Handle one inbound frame, returning the response frame
    pub async fn handle_message(&self, conn_id: &str, raw: &str) -> StreamMessage {
        self.connections.record_received(conn_id, raw.len()).await;

        let message = match StreamMessage::parse(raw, self.max_message_size) {
            Ok(message) => message,
            Err(detail) => {
                warn!("Rejecting frame from {conn_id}: {detail}");
                return StreamMessage::error("bad_message", detail);
            }
        };

        match message.message_type {
            MessageType::Auth => self.handle_auth(conn_id, &message).await,
            MessageType::Subscribe => self.handle_subscribe(conn_id, &message).await,
            MessageType::Unsubscribe => self.handle_unsubscribe(conn_id, &message).await,
            MessageType::Heartbeat => StreamMessage::heartbeat(),
            _ => StreamMessage::error(
                "unsupported",
                format!("clients may not send {:?} frames", message.message_type),
            ),
        }
    }

    async fn handle_auth(&self, conn_id: &str, message: &StreamMessage) -> StreamMessage {
        let Some(token) = message.data.get("token").and_then(|t| t.as_str()) else {
            return StreamMessage::error("auth_failed", "missing token");
        };
        let Some(user_id) = self.auth.validate(token).await else {
            info!("Auth rejected for connection {conn_id}");
            return StreamMessage::error("auth_failed", "invalid token");
        };
        match self.connections.authenticate(conn_id, &user_id).await {
            Ok(()) => StreamMessage::ack(&message.id, None),
            Err(e) => StreamMessage::error(e.code(), e.to_string()),
        }
    }

    async fn handle_subscribe(&self, conn_id: &str, message: &StreamMessage) -> StreamMessage {
        // Unauthenticated subscribes are rejected without side effects
        if !self.connections.is_authenticated(conn_id).await {
            return StreamMessage::error("unauthorized", "authenticate first");
        }
        let Some(stream_id) = message.stream_id.as_deref() else {
            return StreamMessage::error("bad_message", "subscribe requires stream_id");
        };
        if !self.streams.has_stream(stream_id).await {
            return StreamMessage::error("unknown_stream", format!("no stream {stream_id}"));
        }

        if let Err(e) = self.streams.subscribe(stream_id, conn_id).await {
            return StreamMessage::error(e.code(), e.to_string());
        }
        if let Err(e) = self.connections.add_subscription(conn_id, stream_id).await {
            // Keep both registries consistent when the second half fails
            self.streams.unsubscribe(stream_id, conn_id).await;
            return StreamMessage::error(e.code(), e.to_string());
        }

        // New subscribers immediately see recent data
        let snapshot = self.streams.snapshot(stream_id).await;
        if !snapshot.is_empty() {
            let frame = StreamMessage::data(stream_id, serde_json::Value::Array(snapshot));
            if let Err(e) = self.connections.send_to(conn_id, frame).await {
                debug!("Snapshot delivery to {conn_id} failed: {e}");
            }
        }
        StreamMessage::ack(&message.id, Some(stream_id.to_string()))
    }

    async fn handle_unsubscribe(&self, conn_id: &str, message: &StreamMessage) -> StreamMessage {
        let Some(stream_id) = message.stream_id.as_deref() else {
            return StreamMessage::error("bad_message", "unsubscribe requires stream_id");
        };
        self.streams.unsubscribe(stream_id, conn_id).await;
        self.connections.remove_subscription(conn_id, stream_id).await;
        StreamMessage::ack(&message.id, Some(stream_id.to_string()))
    }
}

/// Routes drained pipeline output onto the matching data stream
pub struct StreamRouter {
    streams: Arc<StreamManager>,
}

impl StreamRouter {
    pub fn new(streams: Arc<StreamManager>) -> Arc<Self> {
        Arc::new(Self { streams })
    }
}

#[async_trait]
impl MessageProcessor for StreamRouter {
    fn name(&self) -> &str {
        "stream-router"
    }

    async fn process(&self, output: PipelineOutput) -> TelemetryResult<()> {
        let stream_id = output.kind();
        self.streams.publish(stream_id, output.to_json()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamingConfig;
    use pulse_core::config::StreamingSettings;
    use pulse_core::metrics::create_metrics;
    use serde_json::json;

    fn auth_frame(token: &str) -> String {
        serde_json::to_string(&serde_json::json!({
            "id": "c-auth",
            "type": "auth",
            "data": {"token": token},
            "timestamp": "2026-01-15T10:30:00Z",
        }))
        .unwrap()
    }

    fn subscribe_frame(stream_id: &str) -> String {
        serde_json::to_string(&serde_json::json!({
            "id": "c-sub",
            "type": "subscribe",
            "stream_id": stream_id,
            "timestamp": "2026-01-15T10:30:00Z",
        }))
        .unwrap()
    }

    fn unsubscribe_frame(stream_id: &str) -> String {
        serde_json::to_string(&serde_json::json!({
            "id": "c-unsub",
            "type": "unsubscribe",
            "stream_id": stream_id,
            "timestamp": "2026-01-15T10:30:00Z",
        }))
        .unwrap()
    }

    async fn setup() -> (Arc<StreamHandler>, Arc<StreamManager>, Arc<ConnectionManager>) {
        let connections = ConnectionManager::new(StreamingSettings::default(), create_metrics());
        let streams = StreamManager::new(StreamingConfig::default(), connections.clone());
        let handler = StreamHandler::new(
            streams.clone(),
            connections.clone(),
            Arc::new(TokenAuth::new("secret")),
            1024 * 1024,
        );
        (handler, streams, connections)
    }

    #[tokio::test]
    async fn test_auth_then_subscribe() {
        let (handler, streams, connections) = setup().await;
        let (tx, _rx) = mpsc::channel(8);
        let conn = handler.connect(tx).await;

        let response = handler.handle_message(&conn, &auth_frame("secret:alice")).await;
        assert_eq!(response.message_type, MessageType::Ack);

        let response = handler.handle_message(&conn, &subscribe_frame("telemetry")).await;
        assert_eq!(response.message_type, MessageType::Ack);
        assert!(streams.subscribers("telemetry").await.contains(&conn));
        assert!(connections.subscriptions(&conn).await.contains("telemetry"));
    }

    #[tokio::test]
    async fn test_unauthenticated_subscribe_has_no_side_effects() {
        let (handler, streams, connections) = setup().await;
        let (tx, _rx) = mpsc::channel(8);
        let conn = handler.connect(tx).await;

        let response = handler.handle_message(&conn, &subscribe_frame("telemetry")).await;
        assert_eq!(response.message_type, MessageType::Error);
        assert!(streams.subscribers("telemetry").await.is_empty());
        assert!(connections.subscriptions(&conn).await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let (handler, _streams, _connections) = setup().await;
        let (tx, _rx) = mpsc::channel(8);
        let conn = handler.connect(tx).await;

        let response = handler.handle_message(&conn, &auth_frame("wrong:alice")).await;
        assert_eq!(response.message_type, MessageType::Error);
    }

    #[tokio::test]
    async fn test_subscription_symmetry() {
        let (handler, streams, connections) = setup().await;
        let (tx, mut rx) = mpsc::channel(8);
        let conn = handler.connect(tx).await;

        handler.handle_message(&conn, &auth_frame("secret:alice")).await;
        handler.handle_message(&conn, &subscribe_frame("telemetry")).await;
        handler.handle_message(&conn, &unsubscribe_frame("telemetry")).await;

        assert!(!streams.subscribers("telemetry").await.contains(&conn));
        assert!(!connections.subscriptions(&conn).await.contains("telemetry"));

        // A publish after unsubscribe never reaches this connection
        for i in 0..100 {
            streams.publish("telemetry", json!({"seq": i})).await.unwrap();
        }
        streams.flush("telemetry").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_new_subscriber_receives_snapshot() {
        let (handler, streams, _connections) = setup().await;

        for i in 0..5 {
            streams.publish("analysis", json!({"seq": i})).await.unwrap();
        }

        let (tx, mut rx) = mpsc::channel(8);
        let conn = handler.connect(tx).await;
        handler.handle_message(&conn, &auth_frame("secret:alice")).await;
        handler.handle_message(&conn, &subscribe_frame("analysis")).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.message_type, MessageType::Data);
        assert_eq!(frame.data.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_both_registries() {
        let (handler, streams, connections) = setup().await;
        let (tx, _rx) = mpsc::channel(8);
        let conn = handler.connect(tx).await;

        handler.handle_message(&conn, &auth_frame("secret:alice")).await;
        handler.handle_message(&conn, &subscribe_frame("telemetry")).await;

        handler.disconnect(&conn).await;
        assert!(streams.subscribers("telemetry").await.is_empty());
        assert_eq!(connections.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_answered() {
        let (handler, _streams, _connections) = setup().await;
        let (tx, _rx) = mpsc::channel(8);
        let conn = handler.connect(tx).await;

        let raw = serde_json::to_string(&serde_json::json!({
            "id": "c-hb",
            "type": "heartbeat",
            "timestamp": "2026-01-15T10:30:00Z",
        }))
        .unwrap();
        let response = handler.handle_message(&conn, &raw).await;
        assert_eq!(response.message_type, MessageType::Heartbeat);
    }
}
