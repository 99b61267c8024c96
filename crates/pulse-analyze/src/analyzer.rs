//! The analyzer
//!
//! Keeps one bounded rolling buffer per logical series and evaluates all
//! active patterns whenever a new point arrives. A pattern failure is
//! logged and counted; sibling patterns still run.

use crate::patterns;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pulse_core::processed::ProcessedTelemetry;
use pulse_core::rules::{AnalysisPattern, AnalysisResult, PatternParams, PatternType};
use pulse_core::stages::AnalysisStage;
use pulse_core::telemetry::{Severity, TelemetryData};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Analyzer configuration
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Maximum points kept per series
    pub series_capacity: usize,

    /// Maximum analysis results kept in history
    pub max_history: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            series_capacity: 10000,
            max_history: 1000,
        }
    }
}

#[derive(Debug, Clone)]
struct SeriesPoint {
    telemetry_id: String,
    timestamp: DateTime<Utc>,
    value: f64,
}

/// Analyzer statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalyzerStatistics {
    pub total_analyzed: u64,
    pub detections: u64,
    pub pattern_failures: u64,
    pub series_tracked: usize,
    pub history_size: usize,
}

/// Windowed statistical analyzer
pub struct Analyzer {
    config: AnalyzerConfig,
    patterns: RwLock<Vec<AnalysisPattern>>,
    series: Mutex<HashMap<String, VecDeque<SeriesPoint>>>,
    history: Mutex<VecDeque<AnalysisResult>>,
    analyzed: AtomicU64,
    detections: AtomicU64,
    pattern_failures: AtomicU64,
}

impl Analyzer {
    /// Create an analyzer with the given patterns; an empty set loads the
    /// built-in defaults
    pub fn new(config: AnalyzerConfig, mut analysis_patterns: Vec<AnalysisPattern>) -> Self {
        if analysis_patterns.is_empty() {
            analysis_patterns = Self::default_patterns();
        }
        Self {
            config,
            patterns: RwLock::new(analysis_patterns),
            series: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            analyzed: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            pattern_failures: AtomicU64::new(0),
        }
    }

    /// Built-in pattern set covering the numeric pillars
    ///
    /// Threshold patterns need configured bounds, so none ship by default.
    pub fn default_patterns() -> Vec<AnalysisPattern> {
        vec![
            AnalysisPattern {
                id: "zscore-anomaly".to_string(),
                name: "Z-score anomaly".to_string(),
                pattern_type: PatternType::Anomaly,
                telemetry_types: Vec::new(),
                window_seconds: 300.0,
                min_data_points: 5,
                params: PatternParams::default(),
                enabled: true,
            },
            AnalysisPattern {
                id: "value-spike".to_string(),
                name: "Value spike".to_string(),
                pattern_type: PatternType::Spike,
                telemetry_types: Vec::new(),
                window_seconds: 120.0,
                min_data_points: 3,
                params: PatternParams::default(),
                enabled: true,
            },
            AnalysisPattern {
                id: "sustained-trend".to_string(),
                name: "Sustained trend".to_string(),
                pattern_type: PatternType::Trend,
                telemetry_types: Vec::new(),
                window_seconds: 600.0,
                min_data_points: 8,
                params: PatternParams::default(),
                enabled: true,
            },
        ]
    }

    /// Replace the active pattern set (config reload hook)
    pub async fn set_patterns(&self, analysis_patterns: Vec<AnalysisPattern>) {
        *self.patterns.write().await = analysis_patterns;
    }

    /// Logical series key: type + source + name + service + host
    fn series_key(data: &TelemetryData) -> String {
        format!(
            "{}|{:?}|{}|{}|{}",
            data.telemetry_type.as_str(),
            data.source,
            data.name,
            data.service_name.as_deref().unwrap_or("-"),
            data.host_name.as_deref().unwrap_or("-"),
        )
    }

    /// Analyze one processed item against all active patterns
    pub async fn analyze_item(&self, item: &ProcessedTelemetry) -> Vec<AnalysisResult> {
        self.analyzed.fetch_add(1, Ordering::Relaxed);

        // Non-numeric telemetry contributes nothing to statistical series
        let Some(value) = item.original.value.as_f64() else {
            return Vec::new();
        };
        if !value.is_finite() {
            return Vec::new();
        }

        let key = Self::series_key(&item.original);
        let snapshot: Vec<SeriesPoint> = {
            let mut series = self.series.lock().await;
            let buffer = series.entry(key).or_default();
            buffer.push_back(SeriesPoint {
                telemetry_id: item.original.id.clone(),
                timestamp: item.original.timestamp,
                value,
            });
            while buffer.len() > self.config.series_capacity {
                buffer.pop_front();
            }
            buffer.iter().cloned().collect()
        };

        let mut results = Vec::new();
        let patterns = self.patterns.read().await;
        for pattern in patterns.iter().filter(|p| p.enabled) {
            if !pattern.telemetry_types.is_empty()
                && !pattern.telemetry_types.contains(&item.original.telemetry_type)
            {
                continue;
            }

            // Restrict the series to the pattern's own window
            let cutoff = item.original.timestamp
                - Duration::milliseconds((pattern.window_seconds * 1000.0) as i64);
            let windowed: Vec<&SeriesPoint> =
                snapshot.iter().filter(|p| p.timestamp >= cutoff).collect();
            let values: Vec<f64> = windowed.iter().map(|p| p.value).collect();

            match patterns::evaluate(pattern, &values) {
                Ok(Some(detection)) => {
                    self.detections.fetch_add(1, Ordering::Relaxed);
                    let window_start = windowed
                        .first()
                        .map(|p| p.timestamp)
                        .unwrap_or(item.original.timestamp);
                    results.push(AnalysisResult {
                        id: ulid::Ulid::new().to_string(),
                        pattern_id: pattern.id.clone(),
                        telemetry_ids: windowed.iter().map(|p| p.telemetry_id.clone()).collect(),
                        detected: true,
                        confidence: detection.confidence,
                        severity: Severity::from_confidence(detection.confidence),
                        finding: detection.finding,
                        window_start,
                        window_end: item.original.timestamp,
                        statistics: detection.statistics,
                        recommendations: detection.recommendations,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    self.pattern_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping analysis pattern: {e}");
                }
            }
        }
        drop(patterns);

        if !results.is_empty() {
            debug!(
                "Analysis of {} produced {} detection(s)",
                item.original.id,
                results.len()
            );
            let mut history = self.history.lock().await;
            for result in &results {
                history.push_back(result.clone());
                while history.len() > self.config.max_history {
                    history.pop_front();
                }
            }
        }
        results
    }

    /// Recent analysis results, newest last
    pub async fn recent_results(&self, limit: usize) -> Vec<AnalysisResult> {
        let history = self.history.lock().await;
        history.iter().rev().take(limit).rev().cloned().collect()
    }

    /// Statistics snapshot for ops tooling and tests
    pub async fn get_analysis_statistics(&self) -> AnalyzerStatistics {
        AnalyzerStatistics {
            total_analyzed: self.analyzed.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            pattern_failures: self.pattern_failures.load(Ordering::Relaxed),
            series_tracked: self.series.lock().await.len(),
            history_size: self.history.lock().await.len(),
        }
    }
}

#[async_trait]
impl AnalysisStage for Analyzer {
    async fn analyze(&self, item: &ProcessedTelemetry) -> Vec<AnalysisResult> {
        self.analyze_item(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::telemetry::{TelemetrySource, TelemetryType, TelemetryValue};

    fn gauge(name: &str, value: f64) -> ProcessedTelemetry {
        let data = TelemetryData::new(
            TelemetryType::Gauge,
            TelemetrySource::System,
            name,
            TelemetryValue::Number(value),
        )
        .with_service("api")
        .with_host("web-1");
        ProcessedTelemetry::begin(data)
    }

    #[tokio::test]
    async fn test_anomaly_detected_after_baseline() {
        let analyzer = Analyzer::new(AnalyzerConfig::default(), Vec::new());

        for value in [10.0, 10.4, 9.6, 10.1, 9.9, 10.2] {
            let item = gauge("cpu_usage", value);
            analyzer.analyze_item(&item).await;
        }
        let outlier = gauge("cpu_usage", 80.0);
        let results = analyzer.analyze_item(&outlier).await;

        assert!(results.iter().any(|r| r.pattern_id == "zscore-anomaly"));
        let result = results.iter().find(|r| r.pattern_id == "zscore-anomaly").unwrap();
        assert!(result.detected);
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!(result.telemetry_ids.contains(&outlier.original.id));
    }

    #[tokio::test]
    async fn test_series_isolated_by_key() {
        let analyzer = Analyzer::new(AnalyzerConfig::default(), Vec::new());

        for value in [10.0, 10.1, 9.9, 10.0, 10.2] {
            analyzer.analyze_item(&gauge("cpu_usage", value)).await;
        }
        // A different series never inherits the cpu baseline
        let other = gauge("memory_usage", 80.0);
        let results = analyzer.analyze_item(&other).await;
        assert!(results.is_empty());

        let stats = analyzer.get_analysis_statistics().await;
        assert_eq!(stats.series_tracked, 2);
    }

    #[tokio::test]
    async fn test_non_numeric_skipped() {
        let analyzer = Analyzer::new(AnalyzerConfig::default(), Vec::new());
        let data = TelemetryData::new(
            TelemetryType::Log,
            TelemetrySource::Application,
            "app.log",
            TelemetryValue::Text("not a number at all".into()),
        );
        let results = analyzer.analyze_item(&ProcessedTelemetry::begin(data)).await;
        assert!(results.is_empty());

        let stats = analyzer.get_analysis_statistics().await;
        assert_eq!(stats.total_analyzed, 1);
        assert_eq!(stats.series_tracked, 0);
    }

    #[tokio::test]
    async fn test_bad_pattern_counted_not_fatal() {
        let bad = AnalysisPattern {
            id: "bad-threshold".to_string(),
            name: "no bounds".to_string(),
            pattern_type: PatternType::Threshold,
            telemetry_types: Vec::new(),
            window_seconds: 300.0,
            min_data_points: 1,
            params: PatternParams::default(),
            enabled: true,
        };
        let analyzer = Analyzer::new(AnalyzerConfig::default(), vec![bad]);

        let results = analyzer.analyze_item(&gauge("cpu", 50.0)).await;
        assert!(results.is_empty());

        let stats = analyzer.get_analysis_statistics().await;
        assert_eq!(stats.pattern_failures, 1);
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let config = AnalyzerConfig {
            series_capacity: 100,
            max_history: 3,
        };
        let spike_only = vec![AnalysisPattern {
            id: "spike".to_string(),
            name: "spike".to_string(),
            pattern_type: PatternType::Spike,
            telemetry_types: Vec::new(),
            window_seconds: 600.0,
            min_data_points: 3,
            params: PatternParams::default(),
            enabled: true,
        }];
        let analyzer = Analyzer::new(config, spike_only);

        // Alternate baseline and spike to fire repeatedly
        for round in 0..6 {
            analyzer.analyze_item(&gauge("reqs", 10.0)).await;
            analyzer.analyze_item(&gauge("reqs", 10.0)).await;
            analyzer
                .analyze_item(&gauge("reqs", 100.0 + round as f64))
                .await;
        }

        let stats = analyzer.get_analysis_statistics().await;
        assert!(stats.detections >= 3);
        assert!(stats.history_size <= 3);
    }
}
