//! Events pillar processor

use async_trait::async_trait;
use pulse_core::processed::{ProcessedTelemetry, ProcessingStatus};
use pulse_core::stages::PillarProcessor;
use pulse_core::telemetry::{Pillar, Severity, TelemetryData};
use tracing::debug;

/// Processes discrete events into canonical processed form.
#[derive(Debug, Default)]
pub struct EventsProcessor;

impl EventsProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Categorize an event by its name
    fn category(name: &str) -> &'static str {
        let lower = name.to_lowercase();
        if lower.contains("error") || lower.contains("fail") || lower.contains("exception") {
            "error"
        } else if lower.contains("deploy") || lower.contains("release") || lower.contains("rollout")
        {
            "deployment"
        } else if lower.contains("alert") || lower.contains("threshold") {
            "alerting"
        } else if lower.contains("auth") || lower.contains("login") || lower.contains("security") {
            "security"
        } else {
            "general"
        }
    }
}

#[async_trait]
impl PillarProcessor for EventsProcessor {
    fn pillar(&self) -> Pillar {
        Pillar::Events
    }

    fn name(&self) -> &str {
        "events"
    }

    async fn process(
        &self,
        data: TelemetryData,
        correlation_id: Option<String>,
    ) -> ProcessedTelemetry {
        let mut result = ProcessedTelemetry::begin(data);

        if result.original.name.trim().is_empty() {
            result.fail("event has no name");
            return result;
        }

        let category = Self::category(&result.original.name);
        result
            .processed_data
            .insert("event_type".into(), result.original.name.clone().into());
        result
            .processed_data
            .insert("category".into(), category.into());
        result.processed_data.insert(
            "severity".into(),
            result.original.severity.as_str().into(),
        );
        if let Some(correlation_id) = correlation_id {
            result
                .processed_data
                .insert("correlation_id".into(), correlation_id.into());
        }

        result
            .derived_labels
            .insert("pillar".into(), "events".into());
        result
            .derived_labels
            .insert("category".into(), category.into());

        // Error-ish events at low severity are suspicious; degrade quality
        if category == "error" && result.original.severity < Severity::Warning {
            result.warn("error-category event reported below warning severity");
            result.quality_score = 0.7;
        }

        result.completeness_score = if result.original.service_name.is_some() {
            1.0
        } else {
            0.75
        };
        result.clamp_scores();
        result.finish(ProcessingStatus::Enriched);
        debug!(
            "Processed event {} as {category} ({:.3}ms)",
            result.original.name, result.processing_duration_ms
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::telemetry::{TelemetrySource, TelemetryType, TelemetryValue};

    #[tokio::test]
    async fn test_event_categorized() {
        let data = TelemetryData::new(
            TelemetryType::Event,
            TelemetrySource::Application,
            "performance_alert",
            TelemetryValue::Text("cpu above 80%".into()),
        )
        .with_severity(Severity::Warning);
        let result = EventsProcessor::new().process(data, None).await;

        assert!(result.is_successful());
        assert_eq!(result.processed_data["event_type"], "performance_alert");
        assert_eq!(result.processed_data["category"], "alerting");
        assert_eq!(result.processed_data["severity"], "warning");
    }

    #[tokio::test]
    async fn test_error_event_at_info_degrades_quality() {
        let data = TelemetryData::new(
            TelemetryType::Event,
            TelemetrySource::Application,
            "payment_error",
            TelemetryValue::Text("declined".into()),
        );
        let result = EventsProcessor::new().process(data, None).await;
        assert!(result.is_successful());
        assert!(result.quality_score < 1.0);
    }
}
