//! Rule and result types - correlation rules, analysis patterns, alert rules
//!
//! Rules are externally supplied configuration. The pipeline treats them as
//! immutable per evaluation cycle; reloads swap the whole set.

use crate::telemetry::{Severity, TelemetryType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Declarative correlation rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRule {
    /// Rule identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Types a new candidate must have for this rule to fire
    pub source_types: Vec<TelemetryType>,

    /// Types of window items eligible as correlation targets
    pub target_types: Vec<TelemetryType>,

    /// Maximum timestamp distance between candidate and target
    pub time_window_seconds: f64,

    /// Fields that must match (see `TelemetryData::field` for names)
    pub match_fields: Vec<String>,

    /// Minimum similarity score in [0, 1] for a result to be emitted
    pub similarity_threshold: f64,

    /// Whether the rule is evaluated
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Evaluation priority (higher first)
    #[serde(default)]
    pub priority: i32,

    /// Maximum results kept per window evaluation, highest scores first
    #[serde(default = "default_max_correlations")]
    pub max_correlations: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_correlations() -> usize {
    10
}

impl CorrelationRule {
    /// Default rule set: error and performance correlation
    ///
    /// These ship as illustrative defaults and are replaced wholesale when
    /// rules are supplied externally.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                id: "error-correlation".to_string(),
                name: "Error correlation".to_string(),
                source_types: vec![TelemetryType::Log, TelemetryType::Event],
                target_types: vec![
                    TelemetryType::Log,
                    TelemetryType::Event,
                    TelemetryType::Trace,
                ],
                time_window_seconds: 300.0,
                match_fields: vec![
                    "service_name".to_string(),
                    "trace_id".to_string(),
                    "user_id".to_string(),
                ],
                similarity_threshold: 0.6,
                enabled: true,
                priority: 10,
                max_correlations: 10,
            },
            Self {
                id: "performance-correlation".to_string(),
                name: "Performance correlation".to_string(),
                source_types: vec![
                    TelemetryType::Metric,
                    TelemetryType::Gauge,
                    TelemetryType::Trace,
                ],
                target_types: vec![
                    TelemetryType::Metric,
                    TelemetryType::Gauge,
                    TelemetryType::Trace,
                    TelemetryType::Event,
                ],
                time_window_seconds: 600.0,
                match_fields: vec!["service_name".to_string(), "host_name".to_string()],
                similarity_threshold: 0.5,
                enabled: true,
                priority: 5,
                max_correlations: 10,
            },
        ]
    }
}

/// How the correlated set is related
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    /// Shared trace id
    Trace,
    /// Same service
    Service,
    /// Same host
    Host,
    /// Generic field-pattern match
    Pattern,
}

/// A correlation emitted by the engine
///
/// Invariant: `score >=` the owning rule's `similarity_threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Result identifier
    pub id: String,

    /// Rule that produced the result
    pub rule_id: String,

    /// The candidate that triggered evaluation
    pub primary_telemetry_id: String,

    /// Window items it correlated with
    pub correlated_telemetry_ids: Vec<String>,

    /// Correlation score in [0, 1]
    pub score: f64,

    /// Relationship kind, by priority trace > service > host > pattern
    pub correlation_type: CorrelationType,

    /// Which fields matched
    pub reason: String,

    /// When the result was created
    pub created_at: DateTime<Utc>,

    /// Wall-clock span of the correlated set in seconds
    pub time_span_seconds: f64,
}

/// Kind of statistical analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Anomaly,
    Threshold,
    Trend,
    Spike,
}

/// Tunable parameters for an analysis pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternParams {
    /// Z-score above which a point is anomalous
    pub z_score_threshold: f64,

    /// Upper bound for threshold patterns
    pub max_value: Option<f64>,

    /// Lower bound for threshold patterns
    pub min_value: Option<f64>,

    /// Latest value must exceed the prior mean by this factor to be a spike
    pub spike_multiplier: f64,

    /// Minimum absolute regression slope considered significant
    pub min_slope: f64,
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            z_score_threshold: 3.0,
            max_value: None,
            min_value: None,
            spike_multiplier: 2.5,
            min_slope: 0.1,
        }
    }
}

/// Declarative analysis pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPattern {
    /// Pattern identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Kind of analysis performed
    pub pattern_type: PatternType,

    /// Telemetry types the pattern applies to (empty = all)
    #[serde(default)]
    pub telemetry_types: Vec<TelemetryType>,

    /// Analysis window in seconds
    pub window_seconds: f64,

    /// Minimum series length before the pattern is evaluated
    #[serde(default = "default_min_points")]
    pub min_data_points: usize,

    /// Pattern tunables
    #[serde(default)]
    pub params: PatternParams,

    /// Whether the pattern is evaluated
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_min_points() -> usize {
    5
}

/// Result of evaluating one pattern against one series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Result identifier
    pub id: String,

    /// Pattern that produced the result
    pub pattern_id: String,

    /// Telemetry ids in the analyzed window
    pub telemetry_ids: Vec<String>,

    /// Whether the pattern detected its condition
    pub detected: bool,

    /// Detection confidence in [0, 1]
    pub confidence: f64,

    /// Severity derived from confidence
    pub severity: Severity,

    /// Human-readable finding
    pub finding: String,

    /// Start of the analyzed window
    pub window_start: DateTime<Utc>,

    /// End of the analyzed window
    pub window_end: DateTime<Utc>,

    /// Statistics computed during evaluation (mean, stddev, slope, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub statistics: HashMap<String, f64>,

    /// Suggested operator follow-ups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

/// Comparison operator for alert predicates
///
/// A closed operator set evaluated by a safe interpreter; rule conditions
/// are never executable expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// A single structured predicate: `field <op> operand`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    /// Logical field name (see `TelemetryData::field`)
    pub field: String,

    /// Comparison operator
    pub op: PredicateOp,

    /// Right-hand operand
    pub operand: serde_json::Value,
}

impl Predicate {
    /// Evaluate against a field value; a missing field never matches
    pub fn matches(&self, value: Option<&serde_json::Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self.op {
            PredicateOp::Eq => value == &self.operand,
            PredicateOp::Ne => value != &self.operand,
            PredicateOp::Gt | PredicateOp::Gte | PredicateOp::Lt | PredicateOp::Lte => {
                let (Some(l), Some(r)) = (value.as_f64(), self.operand.as_f64()) else {
                    return false;
                };
                match self.op {
                    PredicateOp::Gt => l > r,
                    PredicateOp::Gte => l >= r,
                    PredicateOp::Lt => l < r,
                    PredicateOp::Lte => l <= r,
                    _ => unreachable!(),
                }
            }
            PredicateOp::Contains => {
                let (Some(l), Some(r)) = (value.as_str(), self.operand.as_str()) else {
                    return false;
                };
                l.contains(r)
            }
        }
    }
}

/// Declarative alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule identifier
    pub id: String,

    /// Human-readable name, used in generated titles
    pub name: String,

    /// All predicates must match for the rule to fire
    pub predicates: Vec<Predicate>,

    /// Severity of the generated alert
    pub severity: Severity,

    /// Suppression window: the same fingerprint fires at most once per window
    #[serde(default = "default_alert_window")]
    pub window_seconds: u64,

    /// Fields folded into the fingerprint
    #[serde(default)]
    pub fingerprint_fields: Vec<String>,

    /// Whether the rule is evaluated
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_alert_window() -> u64 {
    300
}

/// A generated alert, handed off to the notification subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert identifier
    pub id: String,

    /// Rule that fired
    pub rule_id: String,

    /// Generated title
    pub title: String,

    /// Generated message body
    pub message: String,

    /// Alert severity
    pub severity: Severity,

    /// Deduplication fingerprint
    pub fingerprint: String,

    /// Structured context for the notification layer
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the alert was generated
    pub created_at: DateTime<Utc>,
}

/// Deterministic fingerprint over a rule id and selected field values
pub fn alert_fingerprint(rule_id: &str, fields: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    for (key, value) in fields {
        hasher.update(b"\x1f");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_rules_are_sane() {
        let rules = CorrelationRule::defaults();
        assert_eq!(rules.len(), 2);
        for rule in &rules {
            assert!(rule.enabled);
            assert!((0.0..=1.0).contains(&rule.similarity_threshold));
            assert!(!rule.match_fields.is_empty());
        }
    }

    #[test]
    fn test_predicate_numeric_ops() {
        let p = Predicate {
            field: "value".into(),
            op: PredicateOp::Gt,
            operand: json!(80),
        };
        assert!(p.matches(Some(&json!(85.5))));
        assert!(!p.matches(Some(&json!(80))));
        assert!(!p.matches(Some(&json!("not a number"))));
        assert!(!p.matches(None));
    }

    #[test]
    fn test_predicate_contains() {
        let p = Predicate {
            field: "name".into(),
            op: PredicateOp::Contains,
            operand: json!("cpu"),
        };
        assert!(p.matches(Some(&json!("svc_cpu_usage"))));
        assert!(!p.matches(Some(&json!("memory"))));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let fields = vec![("service".to_string(), "api".to_string())];
        let a = alert_fingerprint("rule-1", &fields);
        let b = alert_fingerprint("rule-1", &fields);
        let c = alert_fingerprint("rule-2", &fields);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_rule_toml_roundtrip() {
        let toml_str = r#"
            id = "r1"
            name = "cpu spike"
            source_types = ["gauge"]
            target_types = ["event", "log"]
            time_window_seconds = 60.0
            match_fields = ["service_name"]
            similarity_threshold = 0.7
        "#;
        let rule: CorrelationRule = toml::from_str(toml_str).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.max_correlations, 10);
        assert_eq!(rule.source_types, vec![TelemetryType::Gauge]);
    }
}
