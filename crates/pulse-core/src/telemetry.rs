//! Telemetry data model - the canonical form for all ingested observability data
//!
//! Every data point, regardless of pillar, is normalized into a
//! [`TelemetryData`] before it enters the pipeline.

use crate::error::{TelemetryError, TelemetryResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Telemetry pillar / data point type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryType {
    Metric,
    Log,
    Trace,
    Event,
    Span,
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl TelemetryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryType::Metric => "metric",
            TelemetryType::Log => "log",
            TelemetryType::Trace => "trace",
            TelemetryType::Event => "event",
            TelemetryType::Span => "span",
            TelemetryType::Counter => "counter",
            TelemetryType::Gauge => "gauge",
            TelemetryType::Histogram => "histogram",
            TelemetryType::Summary => "summary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metric" => Some(TelemetryType::Metric),
            "log" => Some(TelemetryType::Log),
            "trace" => Some(TelemetryType::Trace),
            "event" => Some(TelemetryType::Event),
            "span" => Some(TelemetryType::Span),
            "counter" => Some(TelemetryType::Counter),
            "gauge" => Some(TelemetryType::Gauge),
            "histogram" => Some(TelemetryType::Histogram),
            "summary" => Some(TelemetryType::Summary),
            _ => None,
        }
    }

    /// Collapse the metric-family variants onto their pillar
    pub fn pillar(&self) -> Pillar {
        match self {
            TelemetryType::Metric
            | TelemetryType::Counter
            | TelemetryType::Gauge
            | TelemetryType::Histogram
            | TelemetryType::Summary => Pillar::Metrics,
            TelemetryType::Log => Pillar::Logs,
            TelemetryType::Trace | TelemetryType::Span => Pillar::Traces,
            TelemetryType::Event => Pillar::Events,
        }
    }
}

/// The four telemetry pillars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    Metrics,
    Events,
    Logs,
    Traces,
}

impl Pillar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pillar::Metrics => "metrics",
            Pillar::Events => "events",
            Pillar::Logs => "logs",
            Pillar::Traces => "traces",
        }
    }
}

/// Where the telemetry originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    Application,
    System,
    Network,
    Security,
    Infrastructure,
    User,
    External,
}

impl TelemetrySource {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "application" => Some(TelemetrySource::Application),
            "system" => Some(TelemetrySource::System),
            "network" => Some(TelemetrySource::Network),
            "security" => Some(TelemetrySource::Security),
            "infrastructure" => Some(TelemetrySource::Infrastructure),
            "user" => Some(TelemetrySource::User),
            "external" => Some(TelemetrySource::External),
            _ => None,
        }
    }
}

/// Severity level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Severity::Debug),
            "info" => Some(Severity::Info),
            "warning" | "warn" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" | "fatal" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Map an analysis confidence score onto a severity
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Severity::Critical
        } else if confidence >= 0.7 {
            Severity::Error
        } else if confidence >= 0.5 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// Polymorphic telemetry value
///
/// The wire shape is the raw JSON value; internally the kind is tagged so
/// numeric paths never have to re-inspect untyped JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Text(String),
    List(Vec<serde_json::Value>),
    Map(HashMap<String, serde_json::Value>),
}

impl TelemetryValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::Number(n) => Some(*n),
            TelemetryValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TelemetryValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short kind tag used in dedup keys and logs
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryValue::Number(_) => "number",
            TelemetryValue::Text(_) => "text",
            TelemetryValue::List(_) => "list",
            TelemetryValue::Map(_) => "map",
        }
    }

    /// Canonical string used in deduplication keys
    pub fn dedup_repr(&self) -> String {
        match self {
            TelemetryValue::Number(n) => format!("{n}"),
            TelemetryValue::Text(s) => s.clone(),
            TelemetryValue::List(l) => serde_json::to_string(l).unwrap_or_default(),
            TelemetryValue::Map(m) => {
                // Sort keys so logically equal maps produce equal keys
                let mut keys: Vec<_> = m.keys().collect();
                keys.sort();
                keys.iter()
                    .map(|k| format!("{k}={}", m[*k]))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }

    fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(TelemetryValue::Number),
            serde_json::Value::String(s) => Some(TelemetryValue::Text(s)),
            serde_json::Value::Bool(b) => {
                Some(TelemetryValue::Number(if b { 1.0 } else { 0.0 }))
            }
            serde_json::Value::Array(a) => Some(TelemetryValue::List(a)),
            serde_json::Value::Object(o) => {
                Some(TelemetryValue::Map(o.into_iter().collect()))
            }
            serde_json::Value::Null => None,
        }
    }
}

/// One observability data point in canonical form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryData {
    /// Unique telemetry identifier (ULID)
    pub id: String,

    /// Data point type
    #[serde(rename = "type")]
    pub telemetry_type: TelemetryType,

    /// Origin of the data
    pub source: TelemetrySource,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// When the pipeline received it
    pub received_at: DateTime<Utc>,

    /// Metric/log/event/operation name
    pub name: String,

    /// The payload value
    pub value: TelemetryValue,

    /// Unit of measure for numeric values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Dimension labels
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Arbitrary structured attributes
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,

    /// Free-form tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Emitting service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Emitting host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,

    /// Emitting instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Distributed trace id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Span id within the trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Parent span id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Acting user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Session identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Severity of the data point
    #[serde(default)]
    pub severity: Severity,

    /// Confidence in the data, always in [0, 1]
    pub confidence_score: f64,
}

impl TelemetryData {
    /// Create a data point with defaulted identity and timestamps
    pub fn new(
        telemetry_type: TelemetryType,
        source: TelemetrySource,
        name: impl Into<String>,
        value: TelemetryValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            telemetry_type,
            source,
            timestamp: now,
            received_at: now,
            name: name.into(),
            value,
            unit: None,
            labels: HashMap::new(),
            attributes: HashMap::new(),
            tags: Vec::new(),
            service_name: None,
            host_name: None,
            instance_id: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            user_id: None,
            session_id: None,
            severity: Severity::Info,
            confidence_score: 1.0,
        }
    }

    /// Set the service name
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service_name = Some(service.into());
        self
    }

    /// Set the host name
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host_name = Some(host.into());
        self
    }

    /// Set trace context
    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    /// Set the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an attribute
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Clamp the confidence score into [0, 1]
    pub fn clamp_confidence(&mut self) {
        self.confidence_score = self.confidence_score.clamp(0.0, 1.0);
    }

    /// Coerce a raw ingestion mapping into canonical form
    ///
    /// Accepts lowercase enum strings for `type`/`source`/`severity` and
    /// ISO-8601 or epoch-seconds timestamps. Missing `id` and `received_at`
    /// are assigned here.
    pub fn from_json(raw: serde_json::Value) -> TelemetryResult<Self> {
        let obj = match raw {
            serde_json::Value::Object(o) => o,
            _ => {
                return Err(TelemetryError::Validation {
                    field: "payload".to_string(),
                    message: "expected a JSON object".to_string(),
                })
            }
        };

        let str_field = |key: &str| -> Option<String> {
            obj.get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let name = str_field("name").ok_or_else(|| TelemetryError::Validation {
            field: "name".to_string(),
            message: "name is required".to_string(),
        })?;

        let value = obj
            .get("value")
            .cloned()
            .and_then(TelemetryValue::from_json)
            .ok_or_else(|| TelemetryError::Validation {
                field: "value".to_string(),
                message: "value is required".to_string(),
            })?;

        let telemetry_type = match str_field("type") {
            Some(s) => TelemetryType::parse(&s).ok_or_else(|| TelemetryError::Validation {
                field: "type".to_string(),
                message: format!("unknown telemetry type: {s}"),
            })?,
            None => TelemetryType::Metric,
        };

        let source = match str_field("source") {
            Some(s) => TelemetrySource::parse(&s).ok_or_else(|| TelemetryError::Validation {
                field: "source".to_string(),
                message: format!("unknown telemetry source: {s}"),
            })?,
            None => TelemetrySource::Application,
        };

        let severity = match str_field("severity") {
            Some(s) => Severity::parse(&s).ok_or_else(|| TelemetryError::Validation {
                field: "severity".to_string(),
                message: format!("unknown severity: {s}"),
            })?,
            None => Severity::Info,
        };

        let timestamp = match obj.get("timestamp") {
            Some(ts) => parse_timestamp(ts).ok_or_else(|| TelemetryError::Validation {
                field: "timestamp".to_string(),
                message: "expected ISO-8601 string or epoch seconds".to_string(),
            })?,
            None => Utc::now(),
        };

        let labels = obj
            .get("labels")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let attributes = obj
            .get("attributes")
            .and_then(|v| v.as_object())
            .map(|m| m.clone().into_iter().collect())
            .unwrap_or_default();

        let tags = obj
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut data = Self {
            id: str_field("id").unwrap_or_else(|| ulid::Ulid::new().to_string()),
            telemetry_type,
            source,
            timestamp,
            received_at: Utc::now(),
            name,
            value,
            unit: str_field("unit"),
            labels,
            attributes,
            tags,
            service_name: str_field("service_name"),
            host_name: str_field("host_name"),
            instance_id: str_field("instance_id"),
            trace_id: str_field("trace_id"),
            span_id: str_field("span_id"),
            parent_span_id: str_field("parent_span_id"),
            user_id: str_field("user_id"),
            session_id: str_field("session_id"),
            severity,
            confidence_score: obj
                .get("confidence_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0),
        };
        data.clamp_confidence();
        Ok(data)
    }

    /// Look up a logical field by name, as used by correlation match rules
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "id" => Some(serde_json::Value::String(self.id.clone())),
            "name" => Some(serde_json::Value::String(self.name.clone())),
            "type" => Some(serde_json::Value::String(
                self.telemetry_type.as_str().to_string(),
            )),
            "severity" => Some(serde_json::Value::String(self.severity.as_str().to_string())),
            "service_name" => self
                .service_name
                .clone()
                .map(serde_json::Value::String),
            "host_name" => self.host_name.clone().map(serde_json::Value::String),
            "instance_id" => self.instance_id.clone().map(serde_json::Value::String),
            "trace_id" => self.trace_id.clone().map(serde_json::Value::String),
            "span_id" => self.span_id.clone().map(serde_json::Value::String),
            "user_id" => self.user_id.clone().map(serde_json::Value::String),
            "session_id" => self.session_id.clone().map(serde_json::Value::String),
            "value" => serde_json::to_value(&self.value).ok(),
            _ => {
                // Dotted paths reach into labels and attributes
                if let Some(rest) = name.strip_prefix("labels.") {
                    return self
                        .labels
                        .get(rest)
                        .map(|v| serde_json::Value::String(v.clone()));
                }
                if let Some(rest) = name.strip_prefix("attributes.") {
                    return self.attributes.get(rest).cloned();
                }
                self.attributes.get(name).cloned()
            }
        }
    }
}

/// Parse a timestamp from ISO-8601 text or epoch seconds
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => {
            let secs = n.as_f64()?;
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9) as u32;
            Utc.timestamp_opt(whole, nanos).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_pillar_mapping() {
        assert_eq!(TelemetryType::Gauge.pillar(), Pillar::Metrics);
        assert_eq!(TelemetryType::Span.pillar(), Pillar::Traces);
        assert_eq!(TelemetryType::Log.pillar(), Pillar::Logs);
        assert_eq!(TelemetryType::Event.pillar(), Pillar::Events);
    }

    #[test]
    fn test_severity_from_confidence() {
        assert_eq!(Severity::from_confidence(0.95), Severity::Critical);
        assert_eq!(Severity::from_confidence(0.75), Severity::Error);
        assert_eq!(Severity::from_confidence(0.55), Severity::Warning);
        assert_eq!(Severity::from_confidence(0.2), Severity::Info);
    }

    #[test]
    fn test_from_json_coerces_enums_and_timestamps() {
        let data = TelemetryData::from_json(json!({
            "name": "cpu_usage",
            "value": 85.5,
            "type": "gauge",
            "source": "system",
            "severity": "warning",
            "timestamp": "2026-01-15T10:30:00Z",
            "service_name": "api",
            "labels": {"region": "us-east-1"},
        }))
        .unwrap();

        assert_eq!(data.telemetry_type, TelemetryType::Gauge);
        assert_eq!(data.source, TelemetrySource::System);
        assert_eq!(data.severity, Severity::Warning);
        assert_eq!(data.value.as_f64(), Some(85.5));
        assert_eq!(data.labels.get("region").map(|s| s.as_str()), Some("us-east-1"));
        assert!(!data.id.is_empty());
        assert!(data.received_at >= data.timestamp);
    }

    #[test]
    fn test_from_json_epoch_timestamp() {
        let data = TelemetryData::from_json(json!({
            "name": "latency",
            "value": 12,
            "timestamp": 1700000000.5,
        }))
        .unwrap();
        assert_eq!(data.timestamp.timestamp(), 1700000000);
    }

    #[test]
    fn test_from_json_missing_name_fails() {
        let err = TelemetryData::from_json(json!({"value": 1})).unwrap_err();
        match err {
            TelemetryError::Validation { field, .. } => assert_eq!(field, "name"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_confidence_clamped() {
        let data = TelemetryData::from_json(json!({
            "name": "x",
            "value": 1,
            "confidence_score": 3.5,
        }))
        .unwrap();
        assert_eq!(data.confidence_score, 1.0);
    }

    #[test]
    fn test_field_lookup() {
        let data = TelemetryData::new(
            TelemetryType::Metric,
            TelemetrySource::Application,
            "reqs",
            TelemetryValue::Number(1.0),
        )
        .with_service("checkout")
        .with_label("env", "prod");

        assert_eq!(
            data.field("service_name"),
            Some(serde_json::Value::String("checkout".into()))
        );
        assert_eq!(
            data.field("labels.env"),
            Some(serde_json::Value::String("prod".into()))
        );
        assert_eq!(data.field("trace_id"), None);
    }
}
