//! WebSocket endpoint
//!
//! Bridges one raw socket to the stream handler: outbound frames arrive
//! on a per-connection channel filled by the stream layer; inbound frames
//! run through the subscription protocol.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use pulse_stream::StreamMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound frames buffered per connection before a slow client loses them
const OUTBOUND_BUFFER: usize = 256;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::channel::<StreamMessage>(OUTBOUND_BUFFER);
    let conn_id = state.stream_handler.connect(tx).await;
    debug!("WebSocket connection {conn_id} established");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        let encoded = match serde_json::to_string(&frame) {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                warn!("Failed to encode frame for {conn_id}: {e}");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(encoded.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(raw))) => {
                        let response = state.stream_handler.handle_message(&conn_id, &raw).await;
                        let encoded = match serde_json::to_string(&response) {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                warn!("Failed to encode response for {conn_id}: {e}");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(encoded.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket receive error on {conn_id}: {e}");
                        break;
                    }
                }
            }
        }
    }

    state.stream_handler.disconnect(&conn_id).await;
    debug!("WebSocket connection {conn_id} closed");
}
