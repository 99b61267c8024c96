//! Logs pillar processor

use async_trait::async_trait;
use pulse_core::processed::{ProcessedTelemetry, ProcessingStatus};
use pulse_core::stages::PillarProcessor;
use pulse_core::telemetry::{Pillar, Severity, TelemetryData};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn level_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(trace|debug|info|warn(?:ing)?|error|fatal|critical)\b")
            .expect("static regex")
    })
}

/// Processes log lines into canonical processed form.
///
/// The message is the log's value; the level is taken from the data
/// point's severity, falling back to a scan of the message text.
#[derive(Debug, Default)]
pub struct LogsProcessor;

impl LogsProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Infer a level from the message text
    fn infer_level(message: &str) -> Option<Severity> {
        let found = level_pattern().find(message)?;
        Severity::parse(&found.as_str().to_lowercase())
    }
}

#[async_trait]
impl PillarProcessor for LogsProcessor {
    fn pillar(&self) -> Pillar {
        Pillar::Logs
    }

    fn name(&self) -> &str {
        "logs"
    }

    async fn process(
        &self,
        data: TelemetryData,
        correlation_id: Option<String>,
    ) -> ProcessedTelemetry {
        let mut result = ProcessedTelemetry::begin(data);

        let Some(message) = result.original.value.as_text().map(str::to_string) else {
            result.fail(format!(
                "log '{}' value must be text, got {}",
                result.original.name,
                result.original.value.kind()
            ));
            return result;
        };

        if message.trim().is_empty() {
            result.fail("log message is empty");
            return result;
        }

        let level = if result.original.severity != Severity::Info {
            result.original.severity
        } else {
            Self::infer_level(&message).unwrap_or(result.original.severity)
        };

        result
            .processed_data
            .insert("message".into(), message.clone().into());
        result
            .processed_data
            .insert("level".into(), level.as_str().into());
        result
            .processed_data
            .insert("logger".into(), result.original.name.clone().into());
        if let Some(correlation_id) = correlation_id {
            result
                .processed_data
                .insert("correlation_id".into(), correlation_id.into());
        }

        result
            .computed_metrics
            .insert("message_length".into(), message.len() as f64);
        result.derived_labels.insert("pillar".into(), "logs".into());
        result
            .derived_labels
            .insert("level".into(), level.as_str().into());

        // Very long lines usually mean unparsed payloads got logged
        if message.len() > 16 * 1024 {
            result.warn("log message exceeds 16KiB");
            result.quality_score = 0.8;
        }

        result.completeness_score = if result.original.service_name.is_some()
            && result.original.host_name.is_some()
        {
            1.0
        } else {
            0.7
        };
        result.clamp_scores();
        result.finish(ProcessingStatus::Enriched);
        debug!(
            "Processed log {} at {} ({:.3}ms)",
            result.original.name,
            level.as_str(),
            result.processing_duration_ms
        );
        result
    }
}
