//! Metrics pillar processor

use async_trait::async_trait;
use pulse_core::processed::{ProcessedTelemetry, ProcessingStatus};
use pulse_core::stages::PillarProcessor;
use pulse_core::telemetry::{Pillar, TelemetryData, TelemetryType};
use tracing::debug;

/// Processes metric-family data points (metric, counter, gauge, histogram,
/// summary) into canonical processed form.
#[derive(Debug, Default)]
pub struct MetricsProcessor;

impl MetricsProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PillarProcessor for MetricsProcessor {
    fn pillar(&self) -> Pillar {
        Pillar::Metrics
    }

    fn name(&self) -> &str {
        "metrics"
    }

    async fn process(
        &self,
        data: TelemetryData,
        correlation_id: Option<String>,
    ) -> ProcessedTelemetry {
        let mut result = ProcessedTelemetry::begin(data);

        // Required fields: name, numeric value, metric type
        let Some(value) = result.original.value.as_f64() else {
            result.fail(format!(
                "metric '{}' has non-numeric value ({})",
                result.original.name,
                result.original.value.kind()
            ));
            return result;
        };

        if !value.is_finite() {
            result.fail(format!("metric '{}' value is not finite", result.original.name));
            return result;
        }

        result
            .processed_data
            .insert("metric_name".into(), result.original.name.clone().into());
        result
            .processed_data
            .insert("metric_value".into(), serde_json::json!(value));
        result.processed_data.insert(
            "metric_type".into(),
            result.original.telemetry_type.as_str().into(),
        );
        if let Some(unit) = &result.original.unit {
            result
                .processed_data
                .insert("unit".into(), unit.clone().into());
        }
        if let Some(correlation_id) = correlation_id {
            result
                .processed_data
                .insert("correlation_id".into(), correlation_id.into());
        }

        result.computed_metrics.insert("value".into(), value);
        result
            .derived_labels
            .insert("pillar".into(), "metrics".into());

        // Quality: counters should not go negative
        if matches!(result.original.telemetry_type, TelemetryType::Counter) && value < 0.0 {
            result.warn("counter value is negative");
            result.quality_score = 0.5;
        }

        result.completeness_score = completeness(&result.original);
        result.clamp_scores();
        result.finish(ProcessingStatus::Enriched);
        debug!(
            "Processed metric {} ({:.3}ms)",
            result.original.name, result.processing_duration_ms
        );
        result
    }
}

/// Fraction of useful optional context present on the point
fn completeness(data: &TelemetryData) -> f64 {
    let fields = [
        data.unit.is_some(),
        data.service_name.is_some(),
        data.host_name.is_some(),
        !data.labels.is_empty(),
    ];
    let present = fields.iter().filter(|f| **f).count();
    0.5 + 0.5 * present as f64 / fields.len() as f64
}
