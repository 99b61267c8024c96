//! WebSocket wire protocol
//!
//! Every frame, in either direction, is one JSON-encoded
//! [`StreamMessage`]. Clients drive the session with auth, subscribe,
//! unsubscribe, and heartbeat messages; the server answers with ack,
//! error, and data frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ulid::Ulid;

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Auth,
    Subscribe,
    Unsubscribe,
    Data,
    Heartbeat,
    Error,
    Ack,
    Control,
}

/// One protocol frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Message identifier
    pub id: String,

    /// Frame type
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Target stream, when the frame concerns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,

    /// Frame payload
    #[serde(default)]
    pub data: serde_json::Value,

    /// When the frame was created
    pub timestamp: DateTime<Utc>,

    /// Additional frame context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StreamMessage {
    fn new(message_type: MessageType, stream_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            id: Ulid::new().to_string(),
            message_type,
            stream_id,
            data,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// A server-to-client data frame carrying a batch
    pub fn data(stream_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Data, Some(stream_id.into()), payload)
    }

    /// An ack responding to the given client message
    pub fn ack(replying_to: &str, stream_id: Option<String>) -> Self {
        let mut msg = Self::new(MessageType::Ack, stream_id, serde_json::Value::Null);
        msg.metadata
            .insert("replying_to".into(), replying_to.into());
        msg
    }

    /// An error frame with a machine-readable code and human detail
    pub fn error(code: &str, detail: impl Into<String>) -> Self {
        Self::new(
            MessageType::Error,
            None,
            serde_json::json!({ "code": code, "detail": detail.into() }),
        )
    }

    /// A server heartbeat response
    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat, None, serde_json::Value::Null)
    }

    /// Parse an inbound frame, enforcing the configured size cap first
    pub fn parse(raw: &str, max_size: usize) -> Result<Self, String> {
        if raw.len() > max_size {
            return Err(format!(
                "message of {} bytes exceeds limit of {max_size}",
                raw.len()
            ));
        }
        serde_json::from_str(raw).map_err(|e| format!("malformed message: {e}"))
    }

    /// Serialized frame size in bytes, used for connection counters
    pub fn encoded_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let msg = StreamMessage::data("telemetry", json!([{"id": "t1"}]));
        let encoded = serde_json::to_value(&msg).unwrap();

        assert_eq!(encoded["type"], "data");
        assert_eq!(encoded["stream_id"], "telemetry");
        assert!(encoded["id"].is_string());
        assert!(encoded["timestamp"].is_string());
    }

    #[test]
    fn test_parse_client_subscribe() {
        let raw = r#"{
            "id": "c1",
            "type": "subscribe",
            "stream_id": "correlations",
            "timestamp": "2026-01-15T10:30:00Z"
        }"#;
        let msg = StreamMessage::parse(raw, 1024).unwrap();
        assert_eq!(msg.message_type, MessageType::Subscribe);
        assert_eq!(msg.stream_id.as_deref(), Some("correlations"));
    }

    #[test]
    fn test_parse_enforces_size_cap() {
        let raw = format!(
            r#"{{"id":"c1","type":"heartbeat","timestamp":"2026-01-15T10:30:00Z","data":"{}"}}"#,
            "x".repeat(2048)
        );
        let err = StreamMessage::parse(&raw, 1024).unwrap_err();
        assert!(err.contains("exceeds limit"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(StreamMessage::parse("not json", 1024).is_err());
    }
}
