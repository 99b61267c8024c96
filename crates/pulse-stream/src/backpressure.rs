//! Backpressure handling between the pipeline and its consumers
//!
//! A bounded queue with a pluggable admission strategy and a background
//! drainer feeding a [`MessageProcessor`]. The queue size never exceeds
//! `max_queue_size` under any strategy.

use crate::load::{LoadLevel, LoadMonitor, LoadSample};
use async_trait::async_trait;
use pulse_collect::RateLimiter;
use pulse_core::config::BackpressureSettings;
use pulse_core::error::{TelemetryError, TelemetryResult};
use pulse_core::pipeline::PipelineOutput;
use pulse_core::stages::OutputSink;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

/// Admission strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureStrategy {
    /// Evict oldest entries above the drop threshold to admit new ones
    DropOldest,
    /// Silently reject incoming items above the drop threshold
    DropNewest,
    /// Gate admission through a token bucket, waiting briefly when empty
    Throttle,
    /// Admit until the queue is physically full
    Buffer,
    /// Explicitly reject above the drop threshold, visible to the caller
    Reject,
    /// Retune rate and threshold continuously from the load monitor
    Adaptive,
}

impl BackpressureStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "drop_oldest" => Some(Self::DropOldest),
            "drop_newest" => Some(Self::DropNewest),
            "throttle" => Some(Self::Throttle),
            "buffer" => Some(Self::Buffer),
            "reject" => Some(Self::Reject),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }
}

/// Backpressure configuration
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    pub strategy: BackpressureStrategy,
    pub max_queue_size: usize,
    pub drop_threshold: f64,
    pub max_rate_per_second: f64,
    pub monitor_interval: Duration,
    pub high_occupancy: f64,
    pub critical_occupancy: f64,
    pub critical_rate_factor: f64,
    pub high_rate_factor: f64,
    pub recovery_rate_factor: f64,
    pub relax_rate_factor: f64,
    pub estimated_item_bytes: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self::from_settings(&BackpressureSettings::default())
            .unwrap_or_else(|_| unreachable!("default settings always carry a valid strategy"))
    }
}

impl BackpressureConfig {
    pub fn from_settings(settings: &BackpressureSettings) -> TelemetryResult<Self> {
        let strategy = BackpressureStrategy::parse(&settings.strategy).ok_or_else(|| {
            TelemetryError::Validation {
                field: "backpressure.strategy".to_string(),
                message: format!("unknown strategy: {}", settings.strategy),
            }
        })?;
        Ok(Self {
            strategy,
            max_queue_size: settings.max_queue_size,
            drop_threshold: settings.drop_threshold,
            max_rate_per_second: settings.max_rate_per_second,
            monitor_interval: Duration::from_secs_f64(settings.monitor_interval_seconds),
            high_occupancy: settings.high_occupancy,
            critical_occupancy: settings.critical_occupancy,
            critical_rate_factor: settings.critical_rate_factor,
            high_rate_factor: settings.high_rate_factor,
            recovery_rate_factor: settings.recovery_rate_factor,
            relax_rate_factor: settings.relax_rate_factor,
            estimated_item_bytes: settings.estimated_item_bytes,
        })
    }
}

/// Consumer of drained queue items
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Processor name for logs
    fn name(&self) -> &str;

    /// Handle one drained item
    async fn process(&self, output: PipelineOutput) -> TelemetryResult<()>;
}

/// Adjustable token bucket driven by the adaptive strategy
#[derive(Debug)]
struct AdaptiveState {
    rate: f64,
    drop_threshold: f64,
    tokens: f64,
    last_refill: Instant,
}

impl AdaptiveState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        self.last_refill = now;
    }
}

/// Statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackpressureStats {
    pub enqueued: u64,
    pub processed: u64,
    pub dropped: u64,
    pub throttled: u64,
    pub rejected: u64,
    pub queue_size: usize,
    pub drop_rate: f64,
    pub load_level: LoadLevel,
    pub current_rate: f64,
}

/// The backpressure handler
pub struct BackpressureHandler {
    config: BackpressureConfig,
    queue: Mutex<VecDeque<PipelineOutput>>,
    notify: Notify,
    throttle: RateLimiter,
    adaptive: Mutex<AdaptiveState>,
    monitor: LoadMonitor,
    enqueued: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    throttled: AtomicU64,
    rejected: AtomicU64,
    processed_in_window: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl BackpressureHandler {
    pub fn new(config: BackpressureConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let monitor = LoadMonitor::new(10, config.high_occupancy, config.critical_occupancy);
        let adaptive = AdaptiveState {
            rate: config.max_rate_per_second,
            drop_threshold: config.drop_threshold,
            tokens: config.max_rate_per_second,
            last_refill: Instant::now(),
        };
        Arc::new(Self {
            throttle: RateLimiter::new(config.max_rate_per_second),
            adaptive: Mutex::new(adaptive),
            monitor,
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            processed_in_window: AtomicU64::new(0),
            shutdown_tx,
        })
    }

    /// Start the drainer and load monitor tasks
    pub fn start(self: &Arc<Self>, processor: Arc<dyn MessageProcessor>) {
        let handler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!("Backpressure drainer started, feeding '{}'", processor.name());
            loop {
                let item = handler.queue.lock().await.pop_front();
                match item {
                    Some(output) => {
                        if let Err(e) = processor.process(output).await {
                            warn!("Message processor '{}' failed: {e}", processor.name());
                        }
                        handler.processed.fetch_add(1, Ordering::Relaxed);
                        handler.processed_in_window.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        tokio::select! {
                            _ = handler.notify.notified() => {}
                            _ = shutdown_rx.changed() => {
                                // Finish in-flight work before exiting
                                while let Some(output) = handler.queue.lock().await.pop_front() {
                                    if let Err(e) = processor.process(output).await {
                                        warn!("Message processor '{}' failed: {e}", processor.name());
                                    }
                                    handler.processed.fetch_add(1, Ordering::Relaxed);
                                }
                                break;
                            }
                        }
                    }
                }
            }
            info!("Backpressure drainer stopped");
        });

        let handler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(handler.config.monitor_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => handler.sample_load().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    /// Signal shutdown to the background tasks
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.notify.notify_waiters();
    }

    async fn sample_load(&self) {
        let queue_size = self.queue.lock().await.len();
        let occupancy = queue_size as f64 / self.config.max_queue_size as f64;
        let memory_budget =
            (self.config.max_queue_size * self.config.estimated_item_bytes) as f64;
        let memory_fraction =
            (queue_size * self.config.estimated_item_bytes) as f64 / memory_budget.max(1.0);
        let window_processed = self.processed_in_window.swap(0, Ordering::Relaxed) as f64;
        let throughput_fraction = window_processed
            / (self.config.max_rate_per_second * self.config.monitor_interval.as_secs_f64())
                .max(1.0);

        let level = self.monitor.record(LoadSample {
            occupancy,
            memory_fraction,
            throughput_fraction,
        });

        if self.config.strategy == BackpressureStrategy::Adaptive {
            self.retune(level).await;
        }
    }

    /// Adaptive retuning: tighten aggressively when critical, relax toward
    /// the configured ceiling when calm.
    async fn retune(&self, level: LoadLevel) {
        let mut state = self.adaptive.lock().await;
        let ceiling = self.config.max_rate_per_second;
        match level {
            LoadLevel::Critical => {
                state.rate = (state.rate * self.config.critical_rate_factor).max(1.0);
                state.drop_threshold = self.config.high_occupancy;
            }
            LoadLevel::High => {
                state.rate = (state.rate * self.config.high_rate_factor).max(1.0);
            }
            LoadLevel::Medium => {
                state.rate = (state.rate * self.config.recovery_rate_factor).min(ceiling);
            }
            LoadLevel::Low => {
                state.rate = (state.rate * self.config.relax_rate_factor).min(ceiling);
                state.drop_threshold = self.config.drop_threshold;
            }
        }
        debug!(
            "Adaptive retune: level={} rate={:.0}/s threshold={:.2}",
            level.as_str(),
            state.rate,
            state.drop_threshold
        );
    }

    /// Admit one item under the configured strategy
    ///
    /// Returns `Ok(true)` when enqueued, `Ok(false)` when dropped or
    /// throttled, and an error for explicit rejection.
    pub async fn enqueue(&self, output: PipelineOutput) -> TelemetryResult<bool> {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        match self.config.strategy {
            BackpressureStrategy::Buffer => self.admit_if_room(output).await,
            BackpressureStrategy::DropOldest => self.admit_evicting_oldest(output).await,
            BackpressureStrategy::DropNewest => self.admit_unless_loaded(output).await,
            BackpressureStrategy::Throttle => self.admit_throttled(output).await,
            BackpressureStrategy::Reject => self.admit_or_reject(output).await,
            BackpressureStrategy::Adaptive => self.admit_adaptive(output).await,
        }
    }

    async fn push(&self, queue: &mut VecDeque<PipelineOutput>, output: PipelineOutput) {
        queue.push_back(output);
        self.notify.notify_one();
    }

    async fn admit_if_room(&self, output: PipelineOutput) -> TelemetryResult<bool> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.max_queue_size {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        self.push(&mut queue, output).await;
        Ok(true)
    }

    async fn admit_evicting_oldest(&self, output: PipelineOutput) -> TelemetryResult<bool> {
        let mut queue = self.queue.lock().await;
        let threshold_len =
            (self.config.drop_threshold * self.config.max_queue_size as f64) as usize;
        while queue.len() >= threshold_len.max(1) || queue.len() >= self.config.max_queue_size {
            if queue.pop_front().is_none() {
                break;
            }
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.push(&mut queue, output).await;
        Ok(true)
    }

    async fn admit_unless_loaded(&self, output: PipelineOutput) -> TelemetryResult<bool> {
        let mut queue = self.queue.lock().await;
        let occupancy = queue.len() as f64 / self.config.max_queue_size as f64;
        if occupancy > self.config.drop_threshold || queue.len() >= self.config.max_queue_size {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        self.push(&mut queue, output).await;
        Ok(true)
    }

    async fn admit_throttled(&self, output: PipelineOutput) -> TelemetryResult<bool> {
        if self.throttle.check().await.is_err() {
            // Wait briefly for tokens to refill, then give up
            tokio::time::sleep(Duration::from_millis(100)).await;
            if self.throttle.check().await.is_err() {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
        }
        self.admit_if_room(output).await
    }

    async fn admit_or_reject(&self, output: PipelineOutput) -> TelemetryResult<bool> {
        let mut queue = self.queue.lock().await;
        let occupancy = queue.len() as f64 / self.config.max_queue_size as f64;
        if occupancy > self.config.drop_threshold || queue.len() >= self.config.max_queue_size {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(TelemetryError::Resource {
                resource: "backpressure queue".to_string(),
                message: format!("occupancy {occupancy:.2} over threshold"),
            });
        }
        self.push(&mut queue, output).await;
        Ok(true)
    }

    async fn admit_adaptive(&self, output: PipelineOutput) -> TelemetryResult<bool> {
        let drop_threshold = {
            let mut state = self.adaptive.lock().await;
            state.refill();
            if state.tokens < 1.0 {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
            state.tokens -= 1.0;
            state.drop_threshold
        };

        let mut queue = self.queue.lock().await;
        let occupancy = queue.len() as f64 / self.config.max_queue_size as f64;
        if occupancy >= drop_threshold || queue.len() >= self.config.max_queue_size {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        self.push(&mut queue, output).await;
        Ok(true)
    }

    /// Current queue length
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Statistics snapshot
    pub async fn stats(&self) -> BackpressureStats {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let throttled = self.throttled.load(Ordering::Relaxed);
        BackpressureStats {
            enqueued,
            processed: self.processed.load(Ordering::Relaxed),
            dropped,
            throttled,
            rejected,
            queue_size: self.queue.lock().await.len(),
            drop_rate: if enqueued > 0 {
                (dropped + rejected + throttled) as f64 / enqueued as f64
            } else {
                0.0
            },
            load_level: self.monitor.level(),
            current_rate: self.adaptive.lock().await.rate,
        }
    }
}

#[async_trait]
impl OutputSink for BackpressureHandler {
    fn name(&self) -> &str {
        "backpressure"
    }

    async fn deliver(&self, output: PipelineOutput) -> TelemetryResult<()> {
        self.enqueue(output).await.map(|_| ())
    }
}
