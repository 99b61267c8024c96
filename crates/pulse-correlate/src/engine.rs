//! The windowed correlation engine
//!
//! New candidates are appended to a time-bounded window and evaluated
//! against every active rule whose source types include the candidate's
//! type. A rule failure is logged and skipped; one bad rule never blocks
//! the others.

use crate::similarity::score_fields;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::error::{TelemetryError, TelemetryResult};
use pulse_core::processed::{CandidateLink, ProcessedTelemetry};
use pulse_core::rules::{CorrelationResult, CorrelationRule, CorrelationType};
use pulse_core::stages::CorrelationStage;
use pulse_core::telemetry::{TelemetryData, TelemetryType};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Correlation engine configuration
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Window length in milliseconds
    pub window_ms: u64,

    /// Maximum candidates held in the window
    pub max_candidates: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_ms: 5000,
            max_candidates: 10000,
        }
    }
}

/// One candidate held in the window
#[derive(Debug, Clone)]
struct WindowEntry {
    telemetry_type: TelemetryType,
    timestamp: DateTime<Utc>,
    inserted_at: Instant,
    data: Arc<TelemetryData>,
}

#[derive(Debug, Default)]
struct EngineCounters {
    candidates: AtomicU64,
    results: AtomicU64,
    rule_failures: AtomicU64,
    latency_us_total: AtomicU64,
}

/// Engine statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct CorrelationStatistics {
    pub total_candidates_processed: u64,
    pub correlations_found: u64,
    pub rule_failures: u64,
    /// Fraction of candidates that produced at least one correlation
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub window_size: usize,
    pub active_rules: usize,
}

/// The correlation engine
pub struct CorrelationEngine {
    config: CorrelationConfig,
    rules: RwLock<Vec<CorrelationRule>>,
    window: Mutex<VecDeque<WindowEntry>>,
    counters: EngineCounters,
    candidates_with_results: AtomicU64,
}

impl CorrelationEngine {
    /// Create an engine with the given rule set; an empty set loads the
    /// built-in defaults
    pub fn new(config: CorrelationConfig, mut rules: Vec<CorrelationRule>) -> Self {
        if rules.is_empty() {
            rules = CorrelationRule::defaults();
        }
        // Higher priority rules evaluate first
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));

        Self {
            config,
            rules: RwLock::new(rules),
            window: Mutex::new(VecDeque::new()),
            counters: EngineCounters::default(),
            candidates_with_results: AtomicU64::new(0),
        }
    }

    /// Replace the active rule set (config reload hook)
    pub async fn set_rules(&self, mut rules: Vec<CorrelationRule>) {
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        *self.rules.write().await = rules;
    }

    /// Add a candidate to the window and evaluate all active rules
    pub async fn correlate(&self, item: &mut ProcessedTelemetry) -> Vec<CorrelationResult> {
        let started = Instant::now();
        let data = Arc::new(item.original.clone());

        // 1. Append and evict: oldest first, by age then capacity
        let snapshot: Vec<WindowEntry> = {
            let mut window = self.window.lock().await;
            let max_age = std::time::Duration::from_millis(self.config.window_ms);
            let now = Instant::now();
            while let Some(front) = window.front() {
                if now.duration_since(front.inserted_at) > max_age {
                    window.pop_front();
                } else {
                    break;
                }
            }
            while window.len() >= self.config.max_candidates {
                window.pop_front();
            }
            window.push_back(WindowEntry {
                telemetry_type: data.telemetry_type,
                timestamp: data.timestamp,
                inserted_at: now,
                data: data.clone(),
            });
            window.iter().cloned().collect()
        };

        // 2. Evaluate each rule in isolation
        let mut results = Vec::new();
        {
            let rules = self.rules.read().await;
            for rule in rules.iter().filter(|r| r.enabled) {
                match Self::evaluate_rule(rule, &data, &snapshot) {
                    Ok(mut rule_results) => results.append(&mut rule_results),
                    Err(e) => {
                        self.counters.rule_failures.fetch_add(1, Ordering::Relaxed);
                        warn!("Skipping correlation rule: {e}");
                    }
                }
            }
        }

        // 3. Attach candidate links to the processed item
        for result in &results {
            for other in &result.correlated_telemetry_ids {
                item.correlation_candidates.push(CandidateLink {
                    telemetry_id: other.clone(),
                    rule_id: result.rule_id.clone(),
                    score: result.score,
                });
            }
        }

        self.counters.candidates.fetch_add(1, Ordering::Relaxed);
        self.counters
            .results
            .fetch_add(results.len() as u64, Ordering::Relaxed);
        if !results.is_empty() {
            self.candidates_with_results.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .latency_us_total
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);

        debug!(
            "Correlated {}: {} result(s) in {}us",
            data.id,
            results.len(),
            started.elapsed().as_micros()
        );
        results
    }

    /// Evaluate one rule against the window for a new candidate
    fn evaluate_rule(
        rule: &CorrelationRule,
        candidate: &TelemetryData,
        window: &[WindowEntry],
    ) -> TelemetryResult<Vec<CorrelationResult>> {
        if !rule.source_types.contains(&candidate.telemetry_type) {
            return Ok(Vec::new());
        }
        if rule.match_fields.is_empty() {
            return Err(TelemetryError::Correlation {
                rule_id: rule.id.clone(),
                message: "rule has no match fields".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&rule.similarity_threshold) {
            return Err(TelemetryError::Correlation {
                rule_id: rule.id.clone(),
                message: format!(
                    "similarity threshold {} outside [0, 1]",
                    rule.similarity_threshold
                ),
            });
        }

        let mut results = Vec::new();
        for entry in window {
            if entry.data.id == candidate.id {
                continue;
            }
            if !rule.target_types.contains(&entry.telemetry_type) {
                continue;
            }
            let gap_seconds = (candidate.timestamp - entry.timestamp)
                .num_milliseconds()
                .abs() as f64
                / 1000.0;
            if gap_seconds > rule.time_window_seconds {
                continue;
            }

            let (score, matched) = score_fields(candidate, &entry.data, &rule.match_fields);
            if score < rule.similarity_threshold {
                continue;
            }

            results.push(CorrelationResult {
                id: ulid::Ulid::new().to_string(),
                rule_id: rule.id.clone(),
                primary_telemetry_id: candidate.id.clone(),
                correlated_telemetry_ids: vec![entry.data.id.clone()],
                score,
                correlation_type: classify(candidate, &entry.data),
                reason: format!("matched fields: {}", matched.join(", ")),
                created_at: Utc::now(),
                time_span_seconds: gap_seconds,
            });
        }

        // Keep highest-scoring results up to the rule's cap
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(rule.max_correlations);
        Ok(results)
    }

    /// Statistics snapshot for ops tooling and tests
    pub async fn get_correlation_statistics(&self) -> CorrelationStatistics {
        let candidates = self.counters.candidates.load(Ordering::Relaxed);
        let with_results = self.candidates_with_results.load(Ordering::Relaxed);
        let latency_total = self.counters.latency_us_total.load(Ordering::Relaxed);

        CorrelationStatistics {
            total_candidates_processed: candidates,
            correlations_found: self.counters.results.load(Ordering::Relaxed),
            rule_failures: self.counters.rule_failures.load(Ordering::Relaxed),
            success_rate: if candidates > 0 {
                with_results as f64 / candidates as f64
            } else {
                0.0
            },
            average_latency_ms: if candidates > 0 {
                latency_total as f64 / candidates as f64 / 1000.0
            } else {
                0.0
            },
            window_size: self.window.lock().await.len(),
            active_rules: self.rules.read().await.iter().filter(|r| r.enabled).count(),
        }
    }
}

/// Infer the relationship kind, by priority: shared trace id, shared
/// service, shared host, generic pattern.
fn classify(a: &TelemetryData, b: &TelemetryData) -> CorrelationType {
    match (&a.trace_id, &b.trace_id) {
        (Some(x), Some(y)) if x == y => return CorrelationType::Trace,
        _ => {}
    }
    match (&a.service_name, &b.service_name) {
        (Some(x), Some(y)) if x == y => return CorrelationType::Service,
        _ => {}
    }
    match (&a.host_name, &b.host_name) {
        (Some(x), Some(y)) if x == y => return CorrelationType::Host,
        _ => {}
    }
    CorrelationType::Pattern
}

#[async_trait]
impl CorrelationStage for CorrelationEngine {
    async fn add_candidate(&self, item: &mut ProcessedTelemetry) -> Vec<CorrelationResult> {
        self.correlate(item).await
    }
}
