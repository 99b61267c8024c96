//! Correlation engine for Pulse
//!
//! Maintains a sliding time window of processed telemetry from all four
//! pillars and matches new candidates against configurable rules.

pub mod engine;
pub mod similarity;

pub use engine::{CorrelationConfig, CorrelationEngine, CorrelationStatistics};
