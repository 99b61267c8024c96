//! Processed telemetry - the output of a pillar processor
//!
//! Wraps the original [`TelemetryData`] with processing timing, status,
//! and everything downstream stages attach to it.

use crate::telemetry::TelemetryData;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Received,
    Processing,
    Enriched,
    Correlated,
    Analyzed,
    Stored,
    Failed,
}

/// A correlation candidate link attached by the correlation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateLink {
    /// The other telemetry id
    pub telemetry_id: String,

    /// Rule that produced the link
    pub rule_id: String,

    /// Similarity score in [0, 1]
    pub score: f64,
}

/// Wall-clock seconds since the Unix epoch, sub-millisecond resolution
pub fn epoch_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
}

/// A telemetry item after pillar processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedTelemetry {
    /// The original data point
    pub original: TelemetryData,

    /// Processing start, epoch seconds (not rounded)
    pub processing_start_time: f64,

    /// Processing end, epoch seconds (not rounded)
    pub processing_end_time: f64,

    /// Computed duration in milliseconds
    pub processing_duration_ms: f64,

    /// Current lifecycle status
    pub status: ProcessingStatus,

    /// Pillar-specific required fields (e.g. metric name/value/type)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub processed_data: HashMap<String, serde_json::Value>,

    /// Context added by the enricher
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub enriched_attributes: HashMap<String, serde_json::Value>,

    /// Metrics computed during processing
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub computed_metrics: HashMap<String, f64>,

    /// Labels derived during processing
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub derived_labels: HashMap<String, String>,

    /// Candidate links attached by the correlator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlation_candidates: Vec<CandidateLink>,

    /// Errors recorded during processing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    /// Non-fatal warnings recorded during processing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Data quality score in [0, 1]
    pub quality_score: f64,

    /// Field completeness score in [0, 1]
    pub completeness_score: f64,
}

impl ProcessedTelemetry {
    /// Begin processing a data point, capturing the start timestamp
    pub fn begin(original: TelemetryData) -> Self {
        Self {
            original,
            processing_start_time: epoch_seconds(),
            processing_end_time: 0.0,
            processing_duration_ms: 0.0,
            status: ProcessingStatus::Processing,
            processed_data: HashMap::new(),
            enriched_attributes: HashMap::new(),
            computed_metrics: HashMap::new(),
            derived_labels: HashMap::new(),
            correlation_candidates: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            quality_score: 1.0,
            completeness_score: 1.0,
        }
    }

    /// Mark processing complete and compute the duration
    pub fn finish(&mut self, status: ProcessingStatus) {
        self.processing_end_time = epoch_seconds();
        self.processing_duration_ms =
            (self.processing_end_time - self.processing_start_time).max(0.0) * 1000.0;
        self.status = status;
    }

    /// Mark processing failed with error detail
    pub fn fail(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.finish(ProcessingStatus::Failed);
    }

    /// Whether processing completed without a terminal failure
    pub fn is_successful(&self) -> bool {
        self.status != ProcessingStatus::Failed
    }

    /// Record a non-fatal warning
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Clamp quality and completeness into [0, 1]
    pub fn clamp_scores(&mut self) {
        self.quality_score = self.quality_score.clamp(0.0, 1.0);
        self.completeness_score = self.completeness_score.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{TelemetrySource, TelemetryType, TelemetryValue};

    fn sample() -> TelemetryData {
        TelemetryData::new(
            TelemetryType::Metric,
            TelemetrySource::Application,
            "test",
            TelemetryValue::Number(1.0),
        )
    }

    #[test]
    fn test_timing_monotonicity() {
        let mut p = ProcessedTelemetry::begin(sample());
        p.finish(ProcessingStatus::Enriched);

        assert!(p.processing_end_time >= p.processing_start_time);
        assert!(p.processing_duration_ms >= 0.0);
        let expected = (p.processing_end_time - p.processing_start_time) * 1000.0;
        assert!((p.processing_duration_ms - expected).abs() < 1e-9);
    }

    #[test]
    fn test_failure_keeps_detail() {
        let mut p = ProcessedTelemetry::begin(sample());
        p.fail("missing trace_id");

        assert!(!p.is_successful());
        assert_eq!(p.status, ProcessingStatus::Failed);
        assert_eq!(p.errors, vec!["missing trace_id".to_string()]);
    }

    #[test]
    fn test_scores_clamped() {
        let mut p = ProcessedTelemetry::begin(sample());
        p.quality_score = 1.7;
        p.completeness_score = -0.3;
        p.clamp_scores();
        assert_eq!(p.quality_score, 1.0);
        assert_eq!(p.completeness_score, 0.0);
    }
}
