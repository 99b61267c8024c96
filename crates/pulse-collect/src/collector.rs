//! Telemetry collector - the ingestion front door
//!
//! Per item: rate-limit check, normalization into canonical form,
//! validation, deduplication, then append to the in-memory batch. A
//! background task flushes the batch downstream when it reaches
//! `max_batch_size` or `batch_timeout` elapses, whichever comes first.
//! The flush channel is the batching/backpressure boundary between
//! ingestion and processing.

use crate::dedup::{dedup_key, DedupCache};
use crate::rate_limit::RateLimiter;
use chrono::Utc;
use pulse_core::error::{TelemetryError, TelemetryResult};
use pulse_core::metrics::SharedMetrics;
use pulse_core::telemetry::TelemetryData;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Token-bucket rate, items per second
    pub rate_per_second: f64,

    /// Flush the batch at this size
    pub max_batch_size: usize,

    /// Flush the batch after this long
    pub batch_timeout: Duration,

    /// Deduplication window
    pub dedup_window: Duration,

    /// Clock skew tolerated on future timestamps
    pub max_future_skew: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 1000.0,
            max_batch_size: 100,
            batch_timeout: Duration::from_secs(1),
            dedup_window: Duration::from_secs(300),
            max_future_skew: Duration::from_secs(5),
        }
    }
}

/// Outcome of collecting one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// The item was accepted and will be processed
    Accepted(String),
    /// The same logical point was already seen within the dedup window
    Deduplicated(String),
}

impl CollectOutcome {
    /// The telemetry id in either case
    pub fn id(&self) -> &str {
        match self {
            CollectOutcome::Accepted(id) | CollectOutcome::Deduplicated(id) => id,
        }
    }
}

struct BatchState {
    items: Vec<TelemetryData>,
    last_flush: Instant,
}

/// The telemetry collector
pub struct Collector {
    config: CollectorConfig,
    rate_limiter: RateLimiter,
    dedup: Mutex<DedupCache>,
    batch: Mutex<BatchState>,
    batch_tx: mpsc::Sender<Vec<TelemetryData>>,
    metrics: SharedMetrics,
    shutdown_tx: watch::Sender<bool>,
}

impl Collector {
    /// Create a collector flushing into `batch_tx`
    pub fn new(
        config: CollectorConfig,
        batch_tx: mpsc::Sender<Vec<TelemetryData>>,
        metrics: SharedMetrics,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            rate_limiter: RateLimiter::new(config.rate_per_second),
            dedup: Mutex::new(DedupCache::new(config.dedup_window)),
            batch: Mutex::new(BatchState {
                items: Vec::new(),
                last_flush: Instant::now(),
            }),
            config,
            batch_tx,
            metrics,
            shutdown_tx,
        })
    }

    /// Spawn the background flush task
    pub fn start(self: &Arc<Self>) {
        let collector = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.batch_timeout.min(Duration::from_millis(250));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        collector.flush_if_due().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            // Drain the final batch before exiting
                            collector.flush(true).await;
                            info!("Collector flush task stopped");
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Stop the collector, flushing in-flight items
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        // Give the flush task a moment to drain
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    /// Collect a single raw JSON mapping
    pub async fn collect_json(&self, raw: serde_json::Value) -> TelemetryResult<CollectOutcome> {
        let data = TelemetryData::from_json(raw)?;
        self.collect_single(data).await
    }

    /// Collect a single canonical data point
    pub async fn collect_single(&self, data: TelemetryData) -> TelemetryResult<CollectOutcome> {
        self.metrics.collector.received.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.rate_limiter.check().await {
            self.metrics
                .collector
                .rate_limited
                .fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        self.admit(data).await
    }

    /// Collect a batch of raw JSON mappings, partial-failure tolerant
    ///
    /// Each item is validated independently; the batch fails wholesale only
    /// when every item fails.
    pub async fn collect_batch(
        &self,
        items: Vec<serde_json::Value>,
    ) -> TelemetryResult<Vec<CollectOutcome>> {
        let count = items.len();
        self.metrics
            .collector
            .received
            .fetch_add(count as u64, Ordering::Relaxed);

        if let Err(e) = self.rate_limiter.check_batch(count).await {
            self.metrics
                .collector
                .rate_limited
                .fetch_add(count as u64, Ordering::Relaxed);
            return Err(e);
        }

        let mut outcomes = Vec::with_capacity(count);
        let mut failures = 0usize;
        for raw in items {
            let result = match TelemetryData::from_json(raw) {
                Ok(data) => self.admit(data).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    failures += 1;
                    debug!("Batch item rejected: {e}");
                }
            }
        }

        if outcomes.is_empty() && failures > 0 {
            return Err(TelemetryError::Batch { failed: failures });
        }
        Ok(outcomes)
    }

    /// Validate, deduplicate, and buffer one already-normalized item
    async fn admit(&self, mut data: TelemetryData) -> TelemetryResult<CollectOutcome> {
        if let Err(e) = self.validate(&data) {
            self.metrics.collector.failed.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let key = dedup_key(&data);
        {
            let mut dedup = self.dedup.lock().await;
            if !dedup.insert_if_absent(key) {
                self.metrics
                    .collector
                    .deduplicated
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(CollectOutcome::Deduplicated(data.id));
            }
        }

        data.received_at = Utc::now();
        let id = data.id.clone();

        let flush_now = {
            let mut batch = self.batch.lock().await;
            batch.items.push(data);
            batch.items.len() >= self.config.max_batch_size
        };
        if flush_now {
            self.flush(false).await;
        }

        self.metrics.collector.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(CollectOutcome::Accepted(id))
    }

    /// Field-level validation of a canonical data point
    fn validate(&self, data: &TelemetryData) -> TelemetryResult<()> {
        if data.name.trim().is_empty() {
            return Err(TelemetryError::Validation {
                field: "name".to_string(),
                message: "name must not be empty".to_string(),
            });
        }

        let horizon = Utc::now()
            + chrono::Duration::from_std(self.config.max_future_skew)
                .unwrap_or_else(|_| chrono::Duration::seconds(5));
        if data.timestamp > horizon {
            return Err(TelemetryError::Validation {
                field: "timestamp".to_string(),
                message: format!("timestamp {} is in the future", data.timestamp),
            });
        }

        if !(0.0..=1.0).contains(&data.confidence_score) {
            return Err(TelemetryError::Validation {
                field: "confidence_score".to_string(),
                message: format!("{} is outside [0, 1]", data.confidence_score),
            });
        }

        Ok(())
    }

    /// Flush the pending batch if the timeout has elapsed
    async fn flush_if_due(&self) {
        let due = {
            let batch = self.batch.lock().await;
            !batch.items.is_empty() && batch.last_flush.elapsed() >= self.config.batch_timeout
        };
        if due {
            self.flush(false).await;
        }
    }

    /// Flush the pending batch downstream
    async fn flush(&self, final_flush: bool) {
        let items = {
            let mut batch = self.batch.lock().await;
            batch.last_flush = Instant::now();
            if batch.items.is_empty() {
                return;
            }
            std::mem::take(&mut batch.items)
        };

        let count = items.len();
        if self.batch_tx.send(items).await.is_err() {
            warn!("Pipeline channel closed, dropping batch of {count}");
            return;
        }
        self.metrics
            .collector
            .batches_flushed
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            "Flushed batch of {count} item(s){}",
            if final_flush { " (final)" } else { "" }
        );
    }

    /// Number of items currently buffered
    pub async fn pending(&self) -> usize {
        self.batch.lock().await.items.len()
    }
}
