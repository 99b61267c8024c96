//! Pipeline metrics
//!
//! Per-stage atomic counters aggregated for health checks and the stats
//! API. Counters are cheap to bump from any task; aggregation happens only
//! when an operator asks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Collector-stage counters
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    pub failed: AtomicU64,
    pub deduplicated: AtomicU64,
    pub rate_limited: AtomicU64,
    pub batches_flushed: AtomicU64,
}

/// Pillar-processing counters
#[derive(Debug, Default)]
pub struct ProcessingMetrics {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub metrics_items: AtomicU64,
    pub events_items: AtomicU64,
    pub logs_items: AtomicU64,
    pub traces_items: AtomicU64,
}

/// Correlation counters
#[derive(Debug, Default)]
pub struct CorrelationMetrics {
    pub candidates: AtomicU64,
    pub results: AtomicU64,
    pub rule_failures: AtomicU64,
}

/// Analysis counters
#[derive(Debug, Default)]
pub struct AnalysisMetrics {
    pub analyzed: AtomicU64,
    pub detections: AtomicU64,
    pub alerts: AtomicU64,
    pub pattern_failures: AtomicU64,
}

/// Backpressure counters
#[derive(Debug, Default)]
pub struct BackpressureMetrics {
    pub enqueued: AtomicU64,
    pub processed: AtomicU64,
    pub dropped: AtomicU64,
    pub throttled: AtomicU64,
    pub rejected: AtomicU64,
}

/// Streaming counters
#[derive(Debug, Default)]
pub struct StreamingMetrics {
    pub messages_sent: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
}

/// Global metrics collector, one per process
#[derive(Debug)]
pub struct PipelineMetrics {
    start_time: Instant,
    pub collector: CollectorMetrics,
    pub processing: ProcessingMetrics,
    pub correlation: CorrelationMetrics,
    pub analysis: AnalysisMetrics,
    pub backpressure: BackpressureMetrics,
    pub streaming: StreamingMetrics,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            collector: CollectorMetrics::default(),
            processing: ProcessingMetrics::default(),
            correlation: CorrelationMetrics::default(),
            analysis: AnalysisMetrics::default(),
            backpressure: BackpressureMetrics::default(),
            streaming: StreamingMetrics::default(),
        }
    }

    /// Uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Rolling ingestion rate since startup, items per second
    pub fn ingestion_rate(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.collector.accepted.load(Ordering::Relaxed) as f64 / elapsed
    }

    /// Export all counters as JSON for the stats API
    pub fn to_json(&self) -> serde_json::Value {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "ingestion_rate": self.ingestion_rate(),
            "collector": {
                "received": load(&self.collector.received),
                "accepted": load(&self.collector.accepted),
                "failed": load(&self.collector.failed),
                "deduplicated": load(&self.collector.deduplicated),
                "rate_limited": load(&self.collector.rate_limited),
                "batches_flushed": load(&self.collector.batches_flushed),
            },
            "processing": {
                "processed": load(&self.processing.processed),
                "failed": load(&self.processing.failed),
                "by_pillar": {
                    "metrics": load(&self.processing.metrics_items),
                    "events": load(&self.processing.events_items),
                    "logs": load(&self.processing.logs_items),
                    "traces": load(&self.processing.traces_items),
                },
            },
            "correlation": {
                "candidates": load(&self.correlation.candidates),
                "results": load(&self.correlation.results),
                "rule_failures": load(&self.correlation.rule_failures),
            },
            "analysis": {
                "analyzed": load(&self.analysis.analyzed),
                "detections": load(&self.analysis.detections),
                "alerts": load(&self.analysis.alerts),
                "pattern_failures": load(&self.analysis.pattern_failures),
            },
            "backpressure": {
                "enqueued": load(&self.backpressure.enqueued),
                "processed": load(&self.backpressure.processed),
                "dropped": load(&self.backpressure.dropped),
                "throttled": load(&self.backpressure.throttled),
                "rejected": load(&self.backpressure.rejected),
            },
            "streaming": {
                "messages_sent": load(&self.streaming.messages_sent),
                "messages_dropped": load(&self.streaming.messages_dropped),
                "bytes_sent": load(&self.streaming.bytes_sent),
                "connections_opened": load(&self.streaming.connections_opened),
                "connections_closed": load(&self.streaming.connections_closed),
            },
        })
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<PipelineMetrics>;

/// Create a new shared metrics collector
pub fn create_metrics() -> SharedMetrics {
    Arc::new(PipelineMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_aggregate_to_json() {
        let metrics = PipelineMetrics::new();
        metrics.collector.received.fetch_add(10, Ordering::Relaxed);
        metrics.collector.accepted.fetch_add(8, Ordering::Relaxed);
        metrics.backpressure.dropped.fetch_add(2, Ordering::Relaxed);

        let json = metrics.to_json();
        assert_eq!(json["collector"]["received"], 10);
        assert_eq!(json["collector"]["accepted"], 8);
        assert_eq!(json["backpressure"]["dropped"], 2);
    }
}
