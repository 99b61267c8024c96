//! Load monitoring for the backpressure handler
//!
//! Samples queue occupancy, estimated memory, and throughput into a
//! rolling window and classifies the combined load level. The adaptive
//! strategy reads the classification to retune its admission rate.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// Classified load level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl LoadLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadLevel::Low => "low",
            LoadLevel::Medium => "medium",
            LoadLevel::High => "high",
            LoadLevel::Critical => "critical",
        }
    }
}

/// One load sample
#[derive(Debug, Clone, Copy)]
pub struct LoadSample {
    /// Queue occupancy fraction in [0, 1]
    pub occupancy: f64,

    /// Estimated queue memory fraction of the budget in [0, 1]
    pub memory_fraction: f64,

    /// Throughput as a fraction of the configured ceiling in [0, 1]
    pub throughput_fraction: f64,
}

impl LoadSample {
    /// Weighted load score in [0, 1]
    ///
    /// Occupancy dominates; memory pressure and saturated throughput
    /// contribute the rest.
    pub fn score(&self) -> f64 {
        let occupancy = self.occupancy.clamp(0.0, 1.0);
        let memory = self.memory_fraction.clamp(0.0, 1.0);
        let throughput = self.throughput_fraction.clamp(0.0, 1.0);
        (0.6 * occupancy + 0.25 * memory + 0.15 * throughput).clamp(0.0, 1.0)
    }
}

/// Rolling-window load monitor
pub struct LoadMonitor {
    window: Mutex<VecDeque<f64>>,
    window_size: usize,
    high_cutoff: f64,
    critical_cutoff: f64,
}

impl LoadMonitor {
    pub fn new(window_size: usize, high_cutoff: f64, critical_cutoff: f64) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            window_size: window_size.max(1),
            high_cutoff,
            critical_cutoff,
        }
    }

    /// Record a sample and return the current classification
    pub fn record(&self, sample: LoadSample) -> LoadLevel {
        let score = sample.score();
        let average = {
            let mut window = self.window.lock();
            window.push_back(score);
            while window.len() > self.window_size {
                window.pop_front();
            }
            window.iter().sum::<f64>() / window.len() as f64
        };
        let level = self.classify(average);
        debug!("Load sample score={score:.2} rolling={average:.2} level={}", level.as_str());
        level
    }

    /// Current classification from the rolling average
    pub fn level(&self) -> LoadLevel {
        let window = self.window.lock();
        if window.is_empty() {
            return LoadLevel::Low;
        }
        let average = window.iter().sum::<f64>() / window.len() as f64;
        self.classify(average)
    }

    fn classify(&self, score: f64) -> LoadLevel {
        if score >= self.critical_cutoff {
            LoadLevel::Critical
        } else if score >= self.high_cutoff {
            LoadLevel::High
        } else if score >= self.high_cutoff / 2.0 {
            LoadLevel::Medium
        } else {
            LoadLevel::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(occupancy: f64) -> LoadSample {
        LoadSample {
            occupancy,
            memory_fraction: occupancy,
            throughput_fraction: occupancy,
        }
    }

    #[test]
    fn test_idle_classifies_low() {
        let monitor = LoadMonitor::new(5, 0.70, 0.85);
        assert_eq!(monitor.record(sample(0.05)), LoadLevel::Low);
    }

    #[test]
    fn test_saturated_classifies_critical() {
        let monitor = LoadMonitor::new(5, 0.70, 0.85);
        assert_eq!(monitor.record(sample(1.0)), LoadLevel::Critical);
    }

    #[test]
    fn test_rolling_window_smooths_spikes() {
        let monitor = LoadMonitor::new(5, 0.70, 0.85);
        for _ in 0..4 {
            monitor.record(sample(0.1));
        }
        // One saturated sample amid a calm window must not flip to critical
        let level = monitor.record(sample(1.0));
        assert!(level < LoadLevel::High);
    }

    #[test]
    fn test_window_is_bounded() {
        let monitor = LoadMonitor::new(3, 0.70, 0.85);
        for _ in 0..10 {
            monitor.record(sample(1.0));
        }
        // Old calm samples have been evicted entirely
        assert_eq!(monitor.level(), LoadLevel::Critical);
    }

    #[test]
    fn test_score_bounded() {
        let s = LoadSample {
            occupancy: 4.0,
            memory_fraction: -1.0,
            throughput_fraction: 9.0,
        };
        assert!((0.0..=1.0).contains(&s.score()));
    }
}
