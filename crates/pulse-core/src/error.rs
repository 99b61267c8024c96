//! Error taxonomy for the telemetry pipeline
//!
//! Every variant carries enough structure for a caller to decide
//! retry-or-drop without parsing message text.

use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Malformed or out-of-range input, with field-level detail
    #[error("validation failed for field '{field}': {message}")]
    Validation { field: String, message: String },

    /// Admission denied by the rate limiter
    #[error("rate limit exceeded: {current:.1}/s over limit of {limit:.1}/s")]
    RateLimit { limit: f64, current: f64 },

    /// Every item in a batch failed
    #[error("batch processing failed: all {failed} items rejected")]
    Batch { failed: usize },

    /// Pillar processing failure, tagged with the stage that broke
    #[error("processing failed at stage '{stage}' for telemetry {telemetry_id}: {message}")]
    Processing {
        stage: String,
        telemetry_id: String,
        message: String,
    },

    /// Enrichment backend failure
    #[error("enrichment failed for telemetry {telemetry_id}: {message}")]
    Enrichment {
        telemetry_id: String,
        message: String,
    },

    /// Correlation rule evaluation failure
    #[error("correlation rule '{rule_id}' failed: {message}")]
    Correlation { rule_id: String, message: String },

    /// Analysis pattern evaluation failure
    #[error("analysis pattern '{pattern_id}' failed: {message}")]
    Analysis { pattern_id: String, message: String },

    /// Outbound network call failed
    #[error("network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    /// Outbound call timed out
    #[error("timeout after {timeout_ms}ms calling {endpoint}")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Queue or memory exhaustion
    #[error("resource exhausted: {resource} ({message})")]
    Resource { resource: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    /// Stable machine-readable code for operators and sinks
    pub fn code(&self) -> &'static str {
        match self {
            TelemetryError::Validation { .. } => "validation",
            TelemetryError::RateLimit { .. } => "rate_limit",
            TelemetryError::Batch { .. } => "batch",
            TelemetryError::Processing { .. } => "processing",
            TelemetryError::Enrichment { .. } => "enrichment",
            TelemetryError::Correlation { .. } => "correlation",
            TelemetryError::Analysis { .. } => "analysis",
            TelemetryError::Network { .. } => "network",
            TelemetryError::Timeout { .. } => "timeout",
            TelemetryError::Resource { .. } => "resource",
            TelemetryError::Serialization(_) => "serialization",
            TelemetryError::Io(_) => "io",
        }
    }

    /// Whether a caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelemetryError::RateLimit { .. }
                | TelemetryError::Network { .. }
                | TelemetryError::Timeout { .. }
                | TelemetryError::Resource { .. }
        )
    }
}

/// Result alias used across the pipeline
pub type TelemetryResult<T> = Result<T, TelemetryError>;
