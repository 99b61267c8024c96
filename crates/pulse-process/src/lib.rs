//! Pillar processors for Pulse
//!
//! One processor per telemetry pillar. Each is stateless per call and
//! never raises across its public boundary: failures are encoded in the
//! returned [`pulse_core::ProcessedTelemetry`].

pub mod enrich;
pub mod events;
pub mod logs;
pub mod metrics;
pub mod traces;

pub use enrich::HostEnricher;
pub use events::EventsProcessor;
pub use logs::LogsProcessor;
pub use metrics::MetricsProcessor;
pub use traces::TracesProcessor;
