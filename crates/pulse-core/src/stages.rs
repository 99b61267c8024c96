//! Stage traits for the pipeline
//!
//! Each pipeline stage is defined as a trait so stages can be composed,
//! replaced, and tested in isolation.

use crate::error::TelemetryResult;
use crate::pipeline::PipelineOutput;
use crate::processed::ProcessedTelemetry;
use crate::rules::{AnalysisResult, CorrelationResult};
use crate::telemetry::{Pillar, TelemetryData};
use async_trait::async_trait;

/// A pillar processor: validates and normalizes one telemetry item
///
/// Contract: `process` never returns an error across this boundary.
/// Failures are encoded in the returned result's status and error list so
/// a heterogeneous batch survives one bad item.
#[async_trait]
pub trait PillarProcessor: Send + Sync {
    /// The pillar this processor handles
    fn pillar(&self) -> Pillar;

    /// Processor name for logs and stats
    fn name(&self) -> &str;

    /// Whether this processor handles the given data point
    fn handles(&self, data: &TelemetryData) -> bool {
        data.telemetry_type.pillar() == self.pillar()
    }

    /// Process one item into its canonical processed form
    async fn process(
        &self,
        data: TelemetryData,
        correlation_id: Option<String>,
    ) -> ProcessedTelemetry;
}

/// Enrichment stage: adds context to a processed item, best-effort
///
/// An enrichment failure degrades the item (a warning is recorded) but
/// never fails the pipeline.
#[async_trait]
pub trait EnrichStage: Send + Sync {
    /// Stage name for logs
    fn name(&self) -> &str;

    /// Enrich the item in place
    async fn enrich(&self, item: &mut ProcessedTelemetry) -> TelemetryResult<()>;
}

/// Correlation stage: windowed matching of processed items
#[async_trait]
pub trait CorrelationStage: Send + Sync {
    /// Add a candidate to the window and return any new correlations
    async fn add_candidate(&self, item: &mut ProcessedTelemetry) -> Vec<CorrelationResult>;
}

/// Analysis stage: statistical pattern detection over processed items
#[async_trait]
pub trait AnalysisStage: Send + Sync {
    /// Analyze the item against all active patterns
    async fn analyze(&self, item: &ProcessedTelemetry) -> Vec<AnalysisResult>;
}

/// Terminal sink for pipeline output (backpressure handler, exporters)
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Sink name for logs and stats
    fn name(&self) -> &str;

    /// Deliver one output item
    async fn deliver(&self, output: PipelineOutput) -> TelemetryResult<()>;
}
