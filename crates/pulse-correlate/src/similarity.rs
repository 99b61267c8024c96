//! Field similarity scoring
//!
//! Exact matches contribute full weight. Strings fall back to Jaccard
//! similarity over whitespace-tokenized lowercase sets. Numbers get a
//! tight relative tolerance; anything looser is undecided upstream and
//! stays a non-match.

use pulse_core::telemetry::TelemetryData;
use std::collections::HashSet;

/// Relative tolerance treating two numbers as the same measurement
const NUMERIC_TOLERANCE: f64 = 1e-6;

/// Similarity above which a field counts as "matched" in result reasons
const MATCH_CUTOFF: f64 = 0.8;

/// Jaccard similarity over whitespace-tokenized lowercase sets
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Similarity of two field values in [0, 1]
pub fn value_similarity(a: &serde_json::Value, b: &serde_json::Value) -> f64 {
    if a == b {
        return 1.0;
    }
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => {
            let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) else {
                return 0.0;
            };
            let scale = x.abs().max(y.abs());
            if scale == 0.0 || ((x - y).abs() / scale) <= NUMERIC_TOLERANCE {
                1.0
            } else {
                0.0
            }
        }
        (serde_json::Value::String(x), serde_json::Value::String(y)) => jaccard(x, y),
        _ => 0.0,
    }
}

/// Score the match fields of two data points
///
/// Returns the weighted score in [0, 1] and the list of fields that
/// matched. Fields use equal weight; a field missing on either side
/// contributes zero similarity but full weight.
pub fn score_fields(
    a: &TelemetryData,
    b: &TelemetryData,
    fields: &[String],
) -> (f64, Vec<String>) {
    if fields.is_empty() {
        return (0.0, Vec::new());
    }

    let mut total = 0.0;
    let mut matched = Vec::new();
    for field in fields {
        let similarity = match (a.field(field), b.field(field)) {
            (Some(va), Some(vb)) => value_similarity(&va, &vb),
            _ => 0.0,
        };
        if similarity >= MATCH_CUTOFF {
            matched.push(field.clone());
        }
        total += similarity;
    }

    ((total / fields.len() as f64).clamp(0.0, 1.0), matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::telemetry::{TelemetrySource, TelemetryType, TelemetryValue};
    use serde_json::json;

    #[test]
    fn test_jaccard_overlap() {
        assert_eq!(jaccard("cpu high load", "cpu high load"), 1.0);
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
        // {cpu, high} vs {cpu, low}: 1 shared of 3 total
        let score = jaccard("cpu high", "cpu low");
        assert!((score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_jaccard_case_insensitive() {
        assert_eq!(jaccard("CPU High", "cpu high"), 1.0);
    }

    #[test]
    fn test_value_similarity_numeric_tolerance() {
        assert_eq!(value_similarity(&json!(100.0), &json!(100.0)), 1.0);
        assert_eq!(value_similarity(&json!(100.0), &json!(100.00000001)), 1.0);
        assert_eq!(value_similarity(&json!(100.0), &json!(101.0)), 0.0);
    }

    #[test]
    fn test_value_similarity_mixed_types() {
        assert_eq!(value_similarity(&json!("85"), &json!(85)), 0.0);
    }

    #[test]
    fn test_score_fields_weighted_average() {
        let a = TelemetryData::new(
            TelemetryType::Metric,
            TelemetrySource::Application,
            "cpu",
            TelemetryValue::Number(1.0),
        )
        .with_service("api")
        .with_host("web-1");
        let b = TelemetryData::new(
            TelemetryType::Event,
            TelemetrySource::Application,
            "alert",
            TelemetryValue::Number(1.0),
        )
        .with_service("api")
        .with_host("web-2");

        let fields = vec!["service_name".to_string(), "host_name".to_string()];
        let (score, matched) = score_fields(&a, &b, &fields);

        // service matches exactly, host does not ("web-1" vs "web-2" share no tokens)
        assert!((score - 0.5).abs() < 1e-9);
        assert_eq!(matched, vec!["service_name".to_string()]);
    }

    #[test]
    fn test_missing_field_counts_against_score() {
        let a = TelemetryData::new(
            TelemetryType::Metric,
            TelemetrySource::Application,
            "cpu",
            TelemetryValue::Number(1.0),
        )
        .with_service("api");
        let b = a.clone();

        let fields = vec!["service_name".to_string(), "trace_id".to_string()];
        let (score, matched) = score_fields(&a, &b, &fields);
        assert!((score - 0.5).abs() < 1e-9);
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_empty_fields_scores_zero() {
        let a = TelemetryData::new(
            TelemetryType::Metric,
            TelemetrySource::Application,
            "cpu",
            TelemetryValue::Number(1.0),
        );
        let (score, matched) = score_fields(&a, &a.clone(), &[]);
        assert_eq!(score, 0.0);
        assert!(matched.is_empty());
    }
}
