//! Streaming layer for Pulse
//!
//! Protects downstream consumers with a configurable backpressure queue
//! and multiplexes pipeline output to WebSocket subscribers through
//! per-stream circular buffers with batching.

pub mod backpressure;
pub mod connection;
pub mod handler;
pub mod load;
pub mod protocol;
pub mod stream;

pub use backpressure::{
    BackpressureConfig, BackpressureHandler, BackpressureStats, BackpressureStrategy,
    MessageProcessor,
};
pub use connection::{ConnectionManager, ConnectionState};
pub use handler::{AuthValidator, StreamHandler, StreamRouter, TokenAuth};
pub use load::{LoadLevel, LoadMonitor};
pub use protocol::{MessageType, StreamMessage};
pub use stream::{StreamManager, StreamingConfig};
