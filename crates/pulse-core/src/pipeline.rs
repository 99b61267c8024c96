//! Telemetry pipeline - orchestrates the flow from ingestion to fan-out
//!
//! Batches arrive from the collector on a bounded channel, are routed to
//! the pillar processor for their type, then flow through enrichment,
//! correlation, and analysis before every output is broadcast and handed
//! to the terminal sinks.

use crate::error::TelemetryResult;
use crate::metrics::SharedMetrics;
use crate::processed::{ProcessedTelemetry, ProcessingStatus};
use crate::rules::{AnalysisResult, CorrelationResult};
use crate::stages::{AnalysisStage, CorrelationStage, EnrichStage, OutputSink, PillarProcessor};
use crate::telemetry::{Pillar, TelemetryData};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Channel buffer size for incoming batches
    pub batch_buffer_size: usize,

    /// Broadcast buffer size for pipeline output
    pub output_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_buffer_size: 64,
            output_buffer_size: 4096,
        }
    }
}

/// One item of pipeline output, fanned out to sinks and subscribers
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    /// A processed telemetry item
    Processed(Arc<ProcessedTelemetry>),
    /// A correlation emitted by the engine
    Correlation(Arc<CorrelationResult>),
    /// An analysis detection
    Analysis(Arc<AnalysisResult>),
}

impl PipelineOutput {
    /// Output kind tag, used for stream routing
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineOutput::Processed(_) => "telemetry",
            PipelineOutput::Correlation(_) => "correlations",
            PipelineOutput::Analysis(_) => "analysis",
        }
    }

    /// Wire representation as a tagged JSON object. The kind tag is the
    /// same string used for stream routing.
    pub fn to_json(&self) -> serde_json::Value {
        let payload = match self {
            PipelineOutput::Processed(p) => serde_json::to_value(p.as_ref()),
            PipelineOutput::Correlation(c) => serde_json::to_value(c.as_ref()),
            PipelineOutput::Analysis(a) => serde_json::to_value(a.as_ref()),
        }
        .unwrap_or(serde_json::Value::Null);
        serde_json::json!({
            "kind": self.kind(),
            "payload": payload,
        })
    }
}

/// The main telemetry pipeline
pub struct Pipeline {
    config: PipelineConfig,

    /// Pillar processors, routed by telemetry type
    processors: Vec<Arc<dyn PillarProcessor>>,

    /// Enrichment stages, best-effort
    enrichers: Vec<Arc<dyn EnrichStage>>,

    /// Correlation engine
    correlator: Option<Arc<dyn CorrelationStage>>,

    /// Analyzer
    analyzer: Option<Arc<dyn AnalysisStage>>,

    /// Terminal sinks (backpressure handler, exporters)
    sinks: Vec<Arc<dyn OutputSink>>,

    /// Global metrics
    metrics: SharedMetrics,

    /// Broadcast channel for pipeline output (web, ops tooling)
    output_broadcast: broadcast::Sender<PipelineOutput>,

    /// Sender side of the ingestion channel, cloned out to the collector
    batch_tx: mpsc::Sender<Vec<TelemetryData>>,

    /// Receiver side, consumed by start()
    batch_rx: Option<mpsc::Receiver<Vec<TelemetryData>>>,

    /// Running state
    running: Arc<RwLock<bool>>,

    /// Shutdown signal
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl Pipeline {
    /// Create a new pipeline with configuration
    pub fn new(config: PipelineConfig, metrics: SharedMetrics) -> Self {
        let (output_broadcast, _) = broadcast::channel(config.output_buffer_size);
        let (batch_tx, batch_rx) = mpsc::channel(config.batch_buffer_size);

        Self {
            config,
            processors: Vec::new(),
            enrichers: Vec::new(),
            correlator: None,
            analyzer: None,
            sinks: Vec::new(),
            metrics,
            output_broadcast,
            batch_tx,
            batch_rx: Some(batch_rx),
            running: Arc::new(RwLock::new(false)),
            shutdown_tx: None,
        }
    }

    /// Add a pillar processor
    pub fn add_processor(&mut self, processor: Arc<dyn PillarProcessor>) {
        self.processors.push(processor);
    }

    /// Add an enrichment stage
    pub fn add_enricher(&mut self, enricher: Arc<dyn EnrichStage>) {
        self.enrichers.push(enricher);
    }

    /// Set the correlation engine
    pub fn set_correlator(&mut self, correlator: Arc<dyn CorrelationStage>) {
        self.correlator = Some(correlator);
    }

    /// Set the analyzer
    pub fn set_analyzer(&mut self, analyzer: Arc<dyn AnalysisStage>) {
        self.analyzer = Some(analyzer);
    }

    /// Add a terminal sink
    pub fn add_sink(&mut self, sink: Arc<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    /// Sender the collector pushes flushed batches into
    pub fn batch_sender(&self) -> mpsc::Sender<Vec<TelemetryData>> {
        self.batch_tx.clone()
    }

    /// Subscribe to pipeline output
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineOutput> {
        self.output_broadcast.subscribe()
    }

    /// Get the output broadcast sender (for sharing with the web server)
    pub fn output_sender(&self) -> broadcast::Sender<PipelineOutput> {
        self.output_broadcast.clone()
    }

    /// Start the pipeline processing task
    pub async fn start(&mut self) -> TelemetryResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(crate::error::TelemetryError::Resource {
                resource: "pipeline".to_string(),
                message: "already running".to_string(),
            });
        }
        *running = true;
        drop(running);

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let mut batch_rx = self
            .batch_rx
            .take()
            .expect("pipeline started more than once");

        let processors = self.processors.clone();
        let enrichers = self.enrichers.clone();
        let correlator = self.correlator.clone();
        let analyzer = self.analyzer.clone();
        let sinks = self.sinks.clone();
        let metrics = self.metrics.clone();
        let output_broadcast = self.output_broadcast.clone();
        let running = self.running.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        info!(
            "Starting pipeline: {} processors, {} enrichers, {} sinks",
            processors.len(),
            enrichers.len(),
            sinks.len()
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(batch) = batch_rx.recv() => {
                        debug!("Received batch of {} items", batch.len());
                        for item in batch {
                            Self::process_item(
                                item,
                                &processors,
                                &enrichers,
                                correlator.as_ref(),
                                analyzer.as_ref(),
                                &sinks,
                                &metrics,
                                &output_broadcast,
                            )
                            .await;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Pipeline shutdown signal received");
                        break;
                    }
                    else => {
                        // All batch senders dropped, channel closed
                        break;
                    }
                }
            }

            *running.write().await = false;
            info!("Pipeline stopped");
        });

        Ok(())
    }

    /// Stop the pipeline, letting in-flight work finish
    pub async fn stop(&mut self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }

        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }
    }

    /// Check if the pipeline is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Batch channel capacity configured for this pipeline
    pub fn batch_buffer_size(&self) -> usize {
        self.config.batch_buffer_size
    }

    /// Process a single item through every stage
    #[allow(clippy::too_many_arguments)]
    async fn process_item(
        item: TelemetryData,
        processors: &[Arc<dyn PillarProcessor>],
        enrichers: &[Arc<dyn EnrichStage>],
        correlator: Option<&Arc<dyn CorrelationStage>>,
        analyzer: Option<&Arc<dyn AnalysisStage>>,
        sinks: &[Arc<dyn OutputSink>],
        metrics: &SharedMetrics,
        output_broadcast: &broadcast::Sender<PipelineOutput>,
    ) {
        use std::sync::atomic::Ordering;

        // 1. PROCESS: route to the pillar processor for this type
        let Some(processor) = processors.iter().find(|p| p.handles(&item)) else {
            warn!(
                "No processor for telemetry type {:?}, dropping {}",
                item.telemetry_type, item.id
            );
            metrics.processing.failed.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let pillar = processor.pillar();
        let correlation_id = item.trace_id.clone();
        let mut processed = processor.process(item, correlation_id).await;

        let pillar_counter = match pillar {
            Pillar::Metrics => &metrics.processing.metrics_items,
            Pillar::Events => &metrics.processing.events_items,
            Pillar::Logs => &metrics.processing.logs_items,
            Pillar::Traces => &metrics.processing.traces_items,
        };
        pillar_counter.fetch_add(1, Ordering::Relaxed);

        if !processed.is_successful() {
            metrics.processing.failed.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Processor {} failed for {}: {:?}",
                processor.name(),
                processed.original.id,
                processed.errors
            );
            // Failed items still fan out so sinks can account for them
            let output = PipelineOutput::Processed(Arc::new(processed));
            let _ = output_broadcast.send(output.clone());
            Self::deliver(sinks, output).await;
            return;
        }
        metrics.processing.processed.fetch_add(1, Ordering::Relaxed);

        // 2. ENRICH: best-effort, failure degrades the item
        for enricher in enrichers {
            if let Err(e) = enricher.enrich(&mut processed).await {
                debug!("Enricher {} failed: {}", enricher.name(), e);
                processed.warn(format!("enrichment '{}' failed: {e}", enricher.name()));
            }
        }
        if !enrichers.is_empty() {
            processed.status = ProcessingStatus::Enriched;
        }

        // 3. CORRELATE
        let mut correlations = Vec::new();
        if let Some(correlator) = correlator {
            correlations = correlator.add_candidate(&mut processed).await;
            metrics.correlation.candidates.fetch_add(1, Ordering::Relaxed);
            metrics
                .correlation
                .results
                .fetch_add(correlations.len() as u64, Ordering::Relaxed);
            if !correlations.is_empty() {
                processed.status = ProcessingStatus::Correlated;
            }
        }

        // 4. ANALYZE
        let mut analyses = Vec::new();
        if let Some(analyzer) = analyzer {
            analyses = analyzer.analyze(&processed).await;
            metrics.analysis.analyzed.fetch_add(1, Ordering::Relaxed);
            metrics
                .analysis
                .detections
                .fetch_add(analyses.iter().filter(|a| a.detected).count() as u64, Ordering::Relaxed);
            if !analyses.is_empty() {
                processed.status = ProcessingStatus::Analyzed;
            }
        }

        // 5. FAN OUT: broadcast and deliver to sinks
        let output = PipelineOutput::Processed(Arc::new(processed));
        let _ = output_broadcast.send(output.clone());
        Self::deliver(sinks, output).await;

        for correlation in correlations {
            let output = PipelineOutput::Correlation(Arc::new(correlation));
            let _ = output_broadcast.send(output.clone());
            Self::deliver(sinks, output).await;
        }

        for analysis in analyses {
            let output = PipelineOutput::Analysis(Arc::new(analysis));
            let _ = output_broadcast.send(output.clone());
            Self::deliver(sinks, output).await;
        }
    }

    async fn deliver(sinks: &[Arc<dyn OutputSink>], output: PipelineOutput) {
        for sink in sinks {
            if let Err(e) = sink.deliver(output.clone()).await {
                error!("Sink {} failed: {}", sink.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::create_metrics;
    use crate::telemetry::{TelemetrySource, TelemetryType, TelemetryValue};
    use async_trait::async_trait;

    struct PassthroughProcessor;

    #[async_trait]
    impl PillarProcessor for PassthroughProcessor {
        fn pillar(&self) -> Pillar {
            Pillar::Metrics
        }

        fn name(&self) -> &str {
            "passthrough"
        }

        async fn process(
            &self,
            data: TelemetryData,
            _correlation_id: Option<String>,
        ) -> ProcessedTelemetry {
            let mut p = ProcessedTelemetry::begin(data);
            p.finish(ProcessingStatus::Enriched);
            p
        }
    }

    #[tokio::test]
    async fn test_pipeline_routes_and_broadcasts() {
        let metrics = create_metrics();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), metrics.clone());
        pipeline.add_processor(Arc::new(PassthroughProcessor));

        let mut output_rx = pipeline.subscribe();
        let batch_tx = pipeline.batch_sender();
        pipeline.start().await.unwrap();

        let item = TelemetryData::new(
            TelemetryType::Gauge,
            TelemetrySource::System,
            "cpu",
            TelemetryValue::Number(0.5),
        );
        batch_tx.send(vec![item]).await.unwrap();

        let output = tokio::time::timeout(std::time::Duration::from_secs(1), output_rx.recv())
            .await
            .expect("timed out")
            .expect("broadcast closed");
        match output {
            PipelineOutput::Processed(p) => {
                assert!(p.is_successful());
                assert_eq!(p.original.name, "cpu");
            }
            other => panic!("unexpected output: {:?}", other.kind()),
        }

        pipeline.stop().await;
        assert!(!pipeline.is_running().await);
    }

    #[test]
    fn test_wire_kind_tag_matches_routing_kind() {
        use crate::rules::{AnalysisResult, CorrelationResult, CorrelationType};
        use crate::telemetry::Severity;
        use chrono::Utc;

        let processed = {
            let mut p = ProcessedTelemetry::begin(TelemetryData::new(
                TelemetryType::Gauge,
                TelemetrySource::System,
                "cpu",
                TelemetryValue::Number(0.5),
            ));
            p.finish(ProcessingStatus::Enriched);
            p
        };
        let correlation = CorrelationResult {
            id: "c1".to_string(),
            rule_id: "r1".to_string(),
            primary_telemetry_id: "t1".to_string(),
            correlated_telemetry_ids: vec!["t2".to_string()],
            score: 1.0,
            correlation_type: CorrelationType::Service,
            reason: "service_name".to_string(),
            created_at: Utc::now(),
            time_span_seconds: 0.1,
        };
        let analysis = AnalysisResult {
            id: "a1".to_string(),
            pattern_id: "p1".to_string(),
            telemetry_ids: vec!["t1".to_string()],
            detected: true,
            confidence: 0.9,
            severity: Severity::Warning,
            finding: "spike".to_string(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            statistics: Default::default(),
            recommendations: Vec::new(),
        };

        let outputs = [
            PipelineOutput::Processed(Arc::new(processed)),
            PipelineOutput::Correlation(Arc::new(correlation)),
            PipelineOutput::Analysis(Arc::new(analysis)),
        ];
        for output in &outputs {
            assert_eq!(output.to_json()["kind"], output.kind());
        }
    }

    #[tokio::test]
    async fn test_unroutable_type_counts_as_failed() {
        use std::sync::atomic::Ordering;

        let metrics = create_metrics();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), metrics.clone());
        pipeline.add_processor(Arc::new(PassthroughProcessor));
        let batch_tx = pipeline.batch_sender();
        pipeline.start().await.unwrap();

        let item = TelemetryData::new(
            TelemetryType::Log,
            TelemetrySource::Application,
            "no log processor registered",
            TelemetryValue::Text("boom".into()),
        );
        batch_tx.send(vec![item]).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(metrics.processing.failed.load(Ordering::Relaxed), 1);
        pipeline.stop().await;
    }
}
