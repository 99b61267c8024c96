//! Pulse Core - Telemetry types, stage traits, and pipeline orchestration
//!
//! This crate provides the foundational types and abstractions for Pulse:
//!
//! - **Telemetry**: canonical telemetry data model across all four pillars
//! - **Rules**: correlation rules, analysis patterns, and alert rules
//! - **Stages**: trait definitions for all pipeline stages
//! - **Pipeline**: routing and orchestration from ingestion to fan-out

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod processed;
pub mod rules;
pub mod stages;
pub mod telemetry;

// Re-export commonly used types
pub use error::{TelemetryError, TelemetryResult};
pub use pipeline::{Pipeline, PipelineOutput};
pub use processed::{ProcessedTelemetry, ProcessingStatus};
pub use rules::{
    AnalysisPattern, AnalysisResult, CorrelationResult, CorrelationRule, CorrelationType,
    PatternType,
};
pub use stages::{AnalysisStage, CorrelationStage, EnrichStage, OutputSink, PillarProcessor};
pub use telemetry::{
    Pillar, Severity, TelemetryData, TelemetrySource, TelemetryType, TelemetryValue,
};

/// Pulse wire format version
pub const PULSE_VERSION: &str = "0.1";

/// Core version
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
