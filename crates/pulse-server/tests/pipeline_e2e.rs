//! End-to-end pipeline test: ingest four cross-pillar items sharing a
//! correlation label, run them through the full pipeline, and verify the
//! correlation engine ties them together.

use pulse_analyze::{Analyzer, AnalyzerConfig};
use pulse_collect::{Collector, CollectorConfig};
use pulse_core::config::StreamingSettings;
use pulse_core::metrics::create_metrics;
use pulse_core::pipeline::{Pipeline, PipelineConfig, PipelineOutput};
use pulse_core::rules::CorrelationRule;
use pulse_core::telemetry::TelemetryType;
use pulse_correlate::{CorrelationConfig, CorrelationEngine};
use pulse_process::{
    EventsProcessor, HostEnricher, LogsProcessor, MetricsProcessor, TracesProcessor,
};
use pulse_stream::{
    BackpressureConfig, BackpressureHandler, BackpressureStrategy, ConnectionManager,
    StreamManager, StreamRouter, StreamingConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn all_types() -> Vec<TelemetryType> {
    vec![
        TelemetryType::Metric,
        TelemetryType::Gauge,
        TelemetryType::Counter,
        TelemetryType::Event,
        TelemetryType::Log,
        TelemetryType::Trace,
        TelemetryType::Span,
    ]
}

fn correlation_id_rule() -> CorrelationRule {
    CorrelationRule {
        id: "shared-correlation-id".to_string(),
        name: "Shared correlation label".to_string(),
        source_types: all_types(),
        target_types: all_types(),
        time_window_seconds: 5.0,
        match_fields: vec!["labels.correlation_id".to_string()],
        similarity_threshold: 0.9,
        enabled: true,
        priority: 0,
        max_correlations: 10,
    }
}

#[tokio::test]
async fn test_cross_pillar_end_to_end() {
    let metrics = create_metrics();
    let mut pipeline = Pipeline::new(PipelineConfig::default(), metrics.clone());
    pipeline.add_processor(Arc::new(MetricsProcessor::new()));
    pipeline.add_processor(Arc::new(EventsProcessor::new()));
    pipeline.add_processor(Arc::new(LogsProcessor::new()));
    pipeline.add_processor(Arc::new(TracesProcessor::new()));
    pipeline.add_enricher(Arc::new(HostEnricher::new()));

    let engine = Arc::new(CorrelationEngine::new(
        CorrelationConfig::default(),
        vec![correlation_id_rule()],
    ));
    pipeline.set_correlator(engine.clone());
    pipeline.set_analyzer(Arc::new(Analyzer::new(AnalyzerConfig::default(), Vec::new())));

    let mut output_rx = pipeline.subscribe();
    pipeline.start().await.unwrap();

    let collector = Collector::new(
        CollectorConfig {
            max_batch_size: 4,
            batch_timeout: Duration::from_millis(50),
            ..CollectorConfig::default()
        },
        pipeline.batch_sender(),
        metrics.clone(),
    );
    collector.start();

    let items = vec![
        json!({
            "name": "svc_cpu",
            "type": "gauge",
            "source": "system",
            "value": 85,
            "service_name": "checkout",
            "labels": {"correlation_id": "corr-1"},
        }),
        json!({
            "name": "performance_alert",
            "type": "event",
            "source": "application",
            "severity": "warning",
            "value": "cpu threshold crossed",
            "service_name": "checkout",
            "labels": {"correlation_id": "corr-1"},
        }),
        json!({
            "name": "app.worker",
            "type": "log",
            "source": "application",
            "severity": "warning",
            "value": "warn: cpu at 85 percent",
            "service_name": "checkout",
            "labels": {"correlation_id": "corr-1"},
        }),
        json!({
            "name": "GET /checkout",
            "type": "trace",
            "source": "application",
            "value": 1,
            "trace_id": "trace-e2e",
            "span_id": "span-1",
            "service_name": "checkout",
            "attributes": {"status": "ok"},
            "labels": {"correlation_id": "corr-1"},
        }),
    ];

    let outcomes = collector.collect_batch(items).await.unwrap();
    assert_eq!(outcomes.len(), 4);
    let ingested_ids: Vec<String> = outcomes.iter().map(|o| o.id().to_string()).collect();

    // Drain pipeline output until all four processed items have appeared
    let mut processed_seen = 0;
    let mut correlation_ids: Vec<String> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while processed_seen < 4 || correlation_ids.is_empty() {
        let output = tokio::time::timeout_at(deadline, output_rx.recv())
            .await
            .expect("pipeline output timed out")
            .expect("pipeline output channel closed");
        match output {
            PipelineOutput::Processed(item) => {
                assert!(item.is_successful(), "errors: {:?}", item.errors);
                assert!(item.processing_end_time >= item.processing_start_time);
                processed_seen += 1;
            }
            PipelineOutput::Correlation(result) => {
                assert!(result.score >= 0.9);
                correlation_ids.push(result.primary_telemetry_id.clone());
                correlation_ids.extend(result.correlated_telemetry_ids.iter().cloned());
            }
            PipelineOutput::Analysis(_) => {}
        }
    }

    // Every id a correlation references must be one of the four ingested
    for id in &correlation_ids {
        assert!(ingested_ids.contains(id), "unknown id {id} in correlation");
    }

    let stats = engine.get_correlation_statistics().await;
    assert_eq!(stats.total_candidates_processed, 4);
    assert!(stats.correlations_found >= 1);

    collector.stop().await;
    pipeline.stop().await;
}

#[tokio::test]
async fn test_duplicate_submission_is_idempotent() {
    let metrics = create_metrics();
    let pipeline = Pipeline::new(PipelineConfig::default(), metrics.clone());
    let collector = Collector::new(
        CollectorConfig::default(),
        pipeline.batch_sender(),
        metrics,
    );

    let point = json!({
        "name": "reqs_total",
        "type": "counter",
        "source": "application",
        "value": 42,
        "service_name": "api",
        "host_name": "web-1",
    });

    let first = collector.collect_json(point.clone()).await.unwrap();
    let second = collector.collect_json(point).await.unwrap();

    assert!(matches!(first, pulse_collect::CollectOutcome::Accepted(_)));
    assert!(matches!(
        second,
        pulse_collect::CollectOutcome::Deduplicated(_)
    ));
}

#[tokio::test]
async fn test_pipeline_output_reaches_stream_subscribers() {
    let metrics = create_metrics();
    let mut pipeline = Pipeline::new(PipelineConfig::default(), metrics.clone());
    pipeline.add_processor(Arc::new(MetricsProcessor::new()));

    let connections = ConnectionManager::new(StreamingSettings::default(), metrics.clone());
    let streams = StreamManager::new(
        StreamingConfig {
            batch_size: 1,
            ..StreamingConfig::default()
        },
        connections.clone(),
    );
    let backpressure = BackpressureHandler::new(BackpressureConfig {
        strategy: BackpressureStrategy::Buffer,
        ..BackpressureConfig::default()
    });
    backpressure.start(StreamRouter::new(streams.clone()));
    pipeline.add_sink(backpressure.clone());

    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let conn = connections.register(tx).await;
    streams.subscribe("telemetry", &conn).await.unwrap();

    pipeline.start().await.unwrap();
    let batch_tx = pipeline.batch_sender();
    batch_tx
        .send(vec![pulse_core::telemetry::TelemetryData::new(
            TelemetryType::Gauge,
            pulse_core::telemetry::TelemetrySource::System,
            "cpu_usage",
            pulse_core::telemetry::TelemetryValue::Number(42.0),
        )])
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no frame delivered")
        .expect("connection channel closed");
    assert_eq!(frame.stream_id.as_deref(), Some("telemetry"));
    let batch = frame.data.as_array().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0]["payload"]["original"]["name"], "cpu_usage");

    backpressure.stop();
    pipeline.stop().await;
}
