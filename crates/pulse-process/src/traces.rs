//! Traces pillar processor

use async_trait::async_trait;
use pulse_core::processed::{ProcessedTelemetry, ProcessingStatus};
use pulse_core::stages::PillarProcessor;
use pulse_core::telemetry::{Pillar, TelemetryData};
use tracing::debug;

/// Processes spans and traces into canonical processed form.
///
/// Required fields: trace_id, span_id, and an operation name. Span
/// duration is taken from the `duration_ms` attribute when present.
#[derive(Debug, Default)]
pub struct TracesProcessor;

impl TracesProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PillarProcessor for TracesProcessor {
    fn pillar(&self) -> Pillar {
        Pillar::Traces
    }

    fn name(&self) -> &str {
        "traces"
    }

    async fn process(
        &self,
        data: TelemetryData,
        correlation_id: Option<String>,
    ) -> ProcessedTelemetry {
        let mut result = ProcessedTelemetry::begin(data);

        let Some(trace_id) = result.original.trace_id.clone() else {
            result.fail(format!("span '{}' missing trace_id", result.original.name));
            return result;
        };
        let Some(span_id) = result.original.span_id.clone() else {
            result.fail(format!("span '{}' missing span_id", result.original.name));
            return result;
        };
        if result.original.name.trim().is_empty() {
            result.fail("span missing operation_name");
            return result;
        }

        result
            .processed_data
            .insert("trace_id".into(), trace_id.into());
        result.processed_data.insert("span_id".into(), span_id.into());
        result.processed_data.insert(
            "operation_name".into(),
            result.original.name.clone().into(),
        );
        if let Some(parent) = &result.original.parent_span_id {
            result
                .processed_data
                .insert("parent_span_id".into(), parent.clone().into());
        }
        if let Some(correlation_id) = correlation_id {
            result
                .processed_data
                .insert("correlation_id".into(), correlation_id.into());
        }

        let status = result
            .original
            .attributes
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("ok")
            .to_string();
        result
            .processed_data
            .insert("status".into(), status.clone().into());

        if let Some(duration) = result
            .original
            .attributes
            .get("duration_ms")
            .and_then(|v| v.as_f64())
        {
            if duration >= 0.0 {
                result
                    .computed_metrics
                    .insert("span_duration_ms".into(), duration);
            } else {
                result.warn("negative span duration ignored");
                result.quality_score = 0.6;
            }
        }

        result
            .derived_labels
            .insert("pillar".into(), "traces".into());
        result.derived_labels.insert("status".into(), status);

        result.completeness_score = {
            let fields = [
                result.original.parent_span_id.is_some(),
                result.original.service_name.is_some(),
                result.original.attributes.contains_key("duration_ms"),
            ];
            let present = fields.iter().filter(|f| **f).count();
            0.6 + 0.4 * present as f64 / fields.len() as f64
        };
        result.clamp_scores();
        result.finish(ProcessingStatus::Enriched);
        debug!(
            "Processed span {} ({:.3}ms)",
            result.original.name, result.processing_duration_ms
        );
        result
    }
}
