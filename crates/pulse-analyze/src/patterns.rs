//! Pattern evaluators
//!
//! Pure functions over a numeric series slice. Each evaluator returns
//! `Ok(None)` when the pattern simply does not fire, and an error only
//! when the pattern itself is misconfigured.

use pulse_core::error::{TelemetryError, TelemetryResult};
use pulse_core::rules::{AnalysisPattern, PatternType};
use std::collections::HashMap;

/// A positive pattern evaluation
#[derive(Debug, Clone)]
pub struct Detection {
    /// Confidence in [0, 1]
    pub confidence: f64,

    /// Human-readable finding
    pub finding: String,

    /// Statistics computed during evaluation
    pub statistics: HashMap<String, f64>,

    /// Suggested operator follow-ups
    pub recommendations: Vec<String>,
}

/// Evaluate a pattern against a windowed series, newest value last
pub fn evaluate(
    pattern: &AnalysisPattern,
    values: &[f64],
) -> TelemetryResult<Option<Detection>> {
    if values.len() < pattern.min_data_points {
        return Ok(None);
    }
    match pattern.pattern_type {
        PatternType::Anomaly => anomaly(pattern, values),
        PatternType::Threshold => threshold(pattern, values),
        PatternType::Trend => trend(pattern, values),
        PatternType::Spike => spike(pattern, values),
    }
}

fn invalid(pattern: &AnalysisPattern, message: impl Into<String>) -> TelemetryError {
    TelemetryError::Analysis {
        pattern_id: pattern.id.clone(),
        message: message.into(),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Z-score anomaly: the latest value against the mean and stddev of all
/// earlier points.
fn anomaly(pattern: &AnalysisPattern, values: &[f64]) -> TelemetryResult<Option<Detection>> {
    let z_threshold = pattern.params.z_score_threshold;
    if z_threshold <= 0.0 {
        return Err(invalid(pattern, "z_score_threshold must be positive"));
    }

    let (latest, prior) = match values.split_last() {
        Some(split) => split,
        None => return Ok(None),
    };
    let prior_mean = mean(prior);
    let prior_stddev = stddev(prior, prior_mean);
    if prior_stddev < f64::EPSILON {
        // A flat series has no meaningful z-score
        return Ok(None);
    }

    let z = (latest - prior_mean).abs() / prior_stddev;
    if z <= z_threshold {
        return Ok(None);
    }

    let confidence = (z / (2.0 * z_threshold)).min(1.0);
    Ok(Some(Detection {
        confidence,
        finding: format!(
            "value {latest:.3} deviates {z:.2} standard deviations from mean {prior_mean:.3}"
        ),
        statistics: HashMap::from([
            ("z_score".to_string(), z),
            ("mean".to_string(), prior_mean),
            ("stddev".to_string(), prior_stddev),
            ("latest".to_string(), *latest),
        ]),
        recommendations: vec![
            "Inspect the emitting service for recent deploys or load changes".to_string(),
        ],
    }))
}

/// Static bounds check against configured min/max values.
fn threshold(pattern: &AnalysisPattern, values: &[f64]) -> TelemetryResult<Option<Detection>> {
    let params = &pattern.params;
    if params.max_value.is_none() && params.min_value.is_none() {
        return Err(invalid(pattern, "threshold pattern needs max_value or min_value"));
    }
    let latest = match values.last() {
        Some(v) => *v,
        None => return Ok(None),
    };

    let (bound, excess, direction) = match (params.max_value, params.min_value) {
        (Some(max), _) if latest > max => (max, latest - max, "above maximum"),
        (_, Some(min)) if latest < min => (min, min - latest, "below minimum"),
        _ => return Ok(None),
    };

    // Confidence grows with how far past the bound the value sits
    let scale = bound.abs().max(1.0);
    let confidence = (0.5 + excess / scale).min(1.0);
    Ok(Some(Detection {
        confidence,
        finding: format!("value {latest:.3} is {direction} {bound:.3}"),
        statistics: HashMap::from([
            ("latest".to_string(), latest),
            ("bound".to_string(), bound),
            ("excess".to_string(), excess),
        ]),
        recommendations: vec![format!("Review the configured bound of {bound:.3}")],
    }))
}

/// Linear-regression trend over the windowed series.
fn trend(pattern: &AnalysisPattern, values: &[f64]) -> TelemetryResult<Option<Detection>> {
    let min_slope = pattern.params.min_slope;
    if min_slope <= 0.0 {
        return Err(invalid(pattern, "min_slope must be positive"));
    }
    if values.len() < 2 {
        return Ok(None);
    }

    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }
    if denominator < f64::EPSILON {
        return Ok(None);
    }
    let slope = numerator / denominator;
    if slope.abs() < min_slope {
        return Ok(None);
    }

    let first = values[0];
    let last = values[values.len() - 1];
    let percent_change = if first.abs() > f64::EPSILON {
        (last - first) / first.abs() * 100.0
    } else {
        0.0
    };
    let direction = if slope > 0.0 { "increasing" } else { "decreasing" };
    let confidence = (slope.abs() / (10.0 * min_slope)).min(1.0);

    Ok(Some(Detection {
        confidence,
        finding: format!(
            "{direction} trend with slope {slope:.3} ({percent_change:+.1}% over the window)"
        ),
        statistics: HashMap::from([
            ("slope".to_string(), slope),
            ("percent_change".to_string(), percent_change),
            ("points".to_string(), n),
        ]),
        recommendations: vec![format!(
            "Confirm whether the {direction} trend is expected for this series"
        )],
    }))
}

/// Spike detection: the latest value against the mean of the prior two.
fn spike(pattern: &AnalysisPattern, values: &[f64]) -> TelemetryResult<Option<Detection>> {
    let multiplier = pattern.params.spike_multiplier;
    if multiplier <= 1.0 {
        return Err(invalid(pattern, "spike_multiplier must exceed 1.0"));
    }
    if values.len() < 3 {
        return Ok(None);
    }

    let latest = values[values.len() - 1];
    let prev_a = values[values.len() - 2];
    let prev_b = values[values.len() - 3];
    let prior_mean = (prev_a + prev_b) / 2.0;
    if prior_mean <= 0.0 {
        return Ok(None);
    }
    // The spike must clear both prior points, not just their mean
    if latest <= prior_mean * multiplier || latest <= prev_a || latest <= prev_b {
        return Ok(None);
    }

    let ratio = latest / (prior_mean * multiplier);
    let confidence = (ratio / 2.0).min(1.0);
    Ok(Some(Detection {
        confidence,
        finding: format!(
            "value {latest:.3} is {:.1}x the prior mean of {prior_mean:.3}",
            latest / prior_mean
        ),
        statistics: HashMap::from([
            ("latest".to_string(), latest),
            ("prior_mean".to_string(), prior_mean),
            ("ratio".to_string(), latest / prior_mean),
        ]),
        recommendations: vec!["Check for a burst of traffic or a stuck retry loop".to_string()],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::rules::PatternParams;

    fn pattern(pattern_type: PatternType, params: PatternParams) -> AnalysisPattern {
        AnalysisPattern {
            id: "p1".into(),
            name: "test".into(),
            pattern_type,
            telemetry_types: Vec::new(),
            window_seconds: 300.0,
            min_data_points: 5,
            params,
            enabled: true,
        }
    }

    #[test]
    fn test_anomaly_flags_outlier() {
        let p = pattern(PatternType::Anomaly, PatternParams::default());
        let values = vec![10.0, 10.5, 9.5, 10.2, 9.8, 10.1, 50.0];

        let detection = evaluate(&p, &values).unwrap().unwrap();
        assert!(detection.confidence > 0.5);
        assert!(detection.statistics["z_score"] > 3.0);
    }

    #[test]
    fn test_anomaly_ignores_stable_series() {
        let p = pattern(PatternType::Anomaly, PatternParams::default());
        let values = vec![10.0, 10.5, 9.5, 10.2, 9.8, 10.1];
        assert!(evaluate(&p, &values).unwrap().is_none());
    }

    #[test]
    fn test_anomaly_flat_series_no_detection() {
        let p = pattern(PatternType::Anomaly, PatternParams::default());
        let values = vec![5.0; 10];
        assert!(evaluate(&p, &values).unwrap().is_none());
    }

    #[test]
    fn test_too_few_points_no_detection() {
        let p = pattern(PatternType::Anomaly, PatternParams::default());
        assert!(evaluate(&p, &[1.0, 100.0]).unwrap().is_none());
    }

    #[test]
    fn test_threshold_above_max() {
        let params = PatternParams {
            max_value: Some(80.0),
            ..PatternParams::default()
        };
        let p = pattern(PatternType::Threshold, params);
        let values = vec![50.0, 60.0, 70.0, 75.0, 95.0];

        let detection = evaluate(&p, &values).unwrap().unwrap();
        assert!(detection.confidence > 0.5);
        assert!(detection.finding.contains("above maximum"));
    }

    #[test]
    fn test_threshold_without_bounds_is_invalid() {
        let p = pattern(PatternType::Threshold, PatternParams::default());
        let err = evaluate(&p, &[1.0; 5]).unwrap_err();
        assert_eq!(err.code(), "analysis");
    }

    #[test]
    fn test_trend_detects_steady_climb() {
        let p = pattern(PatternType::Trend, PatternParams::default());
        let values: Vec<f64> = (0..10).map(|i| 10.0 + i as f64 * 2.0).collect();

        let detection = evaluate(&p, &values).unwrap().unwrap();
        assert!(detection.statistics["slope"] > 1.9);
        assert!(detection.finding.contains("increasing"));
    }

    #[test]
    fn test_trend_ignores_noise_below_min_slope() {
        let p = pattern(PatternType::Trend, PatternParams::default());
        let values = vec![10.0, 10.02, 9.98, 10.01, 10.03, 9.99];
        assert!(evaluate(&p, &values).unwrap().is_none());
    }

    #[test]
    fn test_spike_requires_clearing_both_priors() {
        let params = PatternParams {
            spike_multiplier: 2.0,
            ..PatternParams::default()
        };
        let mut p = pattern(PatternType::Spike, params);
        p.min_data_points = 3;

        let detected = evaluate(&p, &[10.0, 10.0, 45.0]).unwrap();
        assert!(detected.is_some());

        let not_detected = evaluate(&p, &[10.0, 50.0, 45.0]).unwrap();
        assert!(not_detected.is_none());
    }

    #[test]
    fn test_spike_multiplier_must_exceed_one() {
        let params = PatternParams {
            spike_multiplier: 0.5,
            ..PatternParams::default()
        };
        let mut p = pattern(PatternType::Spike, params);
        p.min_data_points = 3;
        assert!(evaluate(&p, &[1.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_confidence_always_bounded() {
        let p = pattern(PatternType::Anomaly, PatternParams::default());
        let values = vec![10.0, 10.1, 9.9, 10.0, 10.2, 1e9];
        let detection = evaluate(&p, &values).unwrap().unwrap();
        assert!(detection.confidence <= 1.0);
        assert!(detection.confidence >= 0.0);
    }
}
