//! Enrichment stage - adds pipeline host context to processed items
//!
//! Enrichment is best-effort: a failure here records a warning on the
//! item and the pipeline moves on.

use async_trait::async_trait;
use pulse_core::error::TelemetryResult;
use pulse_core::processed::ProcessedTelemetry;
use pulse_core::stages::EnrichStage;

/// Adds the processing host's identity and normalized service context.
#[derive(Debug)]
pub struct HostEnricher {
    pipeline_host: String,
}

impl Default for HostEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEnricher {
    pub fn new() -> Self {
        Self {
            pipeline_host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

#[async_trait]
impl EnrichStage for HostEnricher {
    fn name(&self) -> &str {
        "host"
    }

    async fn enrich(&self, item: &mut ProcessedTelemetry) -> TelemetryResult<()> {
        item.enriched_attributes.insert(
            "pipeline_host".into(),
            self.pipeline_host.clone().into(),
        );
        item.enriched_attributes.insert(
            "pipeline_os".into(),
            std::env::consts::OS.into(),
        );

        if let Some(service) = &item.original.service_name {
            item.derived_labels
                .insert("service".into(), service.clone());
        }
        if let Some(host) = &item.original.host_name {
            item.derived_labels.insert("host".into(), host.clone());
        }

        // Receipt lag is useful context for every downstream consumer
        let lag_ms = (item.original.received_at - item.original.timestamp)
            .num_milliseconds()
            .max(0) as f64;
        item.computed_metrics.insert("receipt_lag_ms".into(), lag_ms);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::telemetry::{TelemetryData, TelemetrySource, TelemetryType, TelemetryValue};

    #[tokio::test]
    async fn test_enrich_adds_host_context() {
        let data = TelemetryData::new(
            TelemetryType::Metric,
            TelemetrySource::Application,
            "reqs",
            TelemetryValue::Number(1.0),
        )
        .with_service("checkout");
        let mut item = ProcessedTelemetry::begin(data);

        HostEnricher::new().enrich(&mut item).await.unwrap();

        assert!(item.enriched_attributes.contains_key("pipeline_host"));
        assert_eq!(item.derived_labels["service"], "checkout");
        assert!(item.computed_metrics["receipt_lag_ms"] >= 0.0);
    }
}
