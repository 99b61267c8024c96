//! Statistical analysis for Pulse
//!
//! Tracks per-series rolling buffers and evaluates anomaly, threshold,
//! trend, and spike patterns on every new point. Detections feed the
//! alert evaluator, which hands generated alerts to an outbound channel.

pub mod alerts;
pub mod analyzer;
pub mod patterns;

pub use alerts::{AlertEvaluator, AlertWebhook};
pub use analyzer::{Analyzer, AnalyzerConfig, AnalyzerStatistics};
