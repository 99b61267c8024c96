//! Alert evaluation and handoff
//!
//! Alert rules are structured predicates over telemetry fields. A firing
//! rule generates an [`Alert`] that is placed on an outbound channel; the
//! notification subsystem consumes that channel. Delivery to the end
//! recipient is its problem, the pipeline only guarantees the handoff.

use pulse_core::processed::ProcessedTelemetry;
use pulse_core::rules::{alert_fingerprint, Alert, AlertRule};
use pulse_core::telemetry::TelemetryData;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Evaluates alert rules against processed telemetry
///
/// Suppression: the same fingerprint fires at most once per rule window.
pub struct AlertEvaluator {
    rules: RwLock<Vec<AlertRule>>,
    recent: Mutex<HashMap<String, Instant>>,
    tx: mpsc::Sender<Alert>,
}

impl AlertEvaluator {
    pub fn new(rules: Vec<AlertRule>, tx: mpsc::Sender<Alert>) -> Self {
        Self {
            rules: RwLock::new(rules),
            recent: Mutex::new(HashMap::new()),
            tx,
        }
    }

    /// Replace the active rule set (config reload hook)
    pub async fn set_rules(&self, rules: Vec<AlertRule>) {
        *self.rules.write().await = rules;
    }

    /// Evaluate all rules against one processed item, returning generated
    /// alerts after placing each on the handoff channel
    pub async fn evaluate(&self, item: &ProcessedTelemetry) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let rules = self.rules.read().await;
        for rule in rules.iter().filter(|r| r.enabled) {
            if rule.predicates.is_empty() {
                continue;
            }
            let matched = rule
                .predicates
                .iter()
                .all(|p| p.matches(item.original.field(&p.field).as_ref()));
            if !matched {
                continue;
            }

            let fingerprint = Self::fingerprint(rule, &item.original);
            if self.suppressed(rule, &fingerprint).await {
                debug!("Alert suppressed within window: rule={}", rule.id);
                continue;
            }

            let alert = Self::build_alert(rule, item, fingerprint);
            info!("Alert generated: rule={} severity={:?}", rule.id, alert.severity);

            // Fire-and-forget handoff. A full channel drops the alert and
            // logs it; the evaluator never blocks the pipeline.
            if let Err(e) = self.tx.try_send(alert.clone()) {
                warn!("Alert handoff channel full, dropping alert: {e}");
            }
            alerts.push(alert);
        }
        alerts
    }

    fn fingerprint(rule: &AlertRule, data: &TelemetryData) -> String {
        let fields: Vec<(String, String)> = rule
            .fingerprint_fields
            .iter()
            .map(|f| {
                let value = data
                    .field(f)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                (f.clone(), value)
            })
            .collect();
        alert_fingerprint(&rule.id, &fields)
    }

    async fn suppressed(&self, rule: &AlertRule, fingerprint: &str) -> bool {
        let window = Duration::from_secs(rule.window_seconds);
        let mut recent = self.recent.lock().await;
        let now = Instant::now();
        recent.retain(|_, fired_at| now.duration_since(*fired_at) < window);

        if recent.contains_key(fingerprint) {
            return true;
        }
        recent.insert(fingerprint.to_string(), now);
        false
    }

    fn build_alert(rule: &AlertRule, item: &ProcessedTelemetry, fingerprint: String) -> Alert {
        let data = &item.original;
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("telemetry_id".into(), data.id.clone().into());
        metadata.insert("telemetry_type".into(), data.telemetry_type.as_str().into());
        metadata.insert("name".into(), data.name.clone().into());
        if let Some(service) = &data.service_name {
            metadata.insert("service_name".into(), service.clone().into());
        }
        if let Some(host) = &data.host_name {
            metadata.insert("host_name".into(), host.clone().into());
        }

        Alert {
            id: Ulid::new().to_string(),
            rule_id: rule.id.clone(),
            title: format!("{}: {}", rule.name, data.name),
            message: format!(
                "Rule '{}' matched telemetry '{}' from {}",
                rule.name,
                data.name,
                data.service_name.as_deref().unwrap_or("unknown service"),
            ),
            severity: rule.severity,
            fingerprint,
            metadata,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Forwards alerts from the handoff channel to an HTTP webhook
///
/// Best-effort with bounded retries; a permanently failing endpoint only
/// costs log noise, never pipeline throughput.
pub struct AlertWebhook {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl AlertWebhook {
    pub fn new(url: String, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url,
            max_retries,
        }
    }

    /// Drain the alert channel until it closes
    pub async fn run(self, mut rx: mpsc::Receiver<Alert>) {
        info!("Alert webhook forwarder started: {}", self.url);
        while let Some(alert) = rx.recv().await {
            self.deliver(&alert).await;
        }
        info!("Alert webhook forwarder stopped");
    }

    async fn deliver(&self, alert: &Alert) {
        for attempt in 0..=self.max_retries {
            match self.client.post(&self.url).json(alert).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Alert {} delivered to webhook", alert.id);
                    return;
                }
                Ok(response) => {
                    warn!(
                        "Webhook returned {} for alert {} (attempt {}/{})",
                        response.status(),
                        alert.id,
                        attempt + 1,
                        self.max_retries + 1,
                    );
                }
                Err(e) => {
                    warn!(
                        "Webhook request failed for alert {} (attempt {}/{}): {e}",
                        alert.id,
                        attempt + 1,
                        self.max_retries + 1,
                    );
                }
            }
            if attempt < self.max_retries {
                let backoff = Duration::from_millis(250 * 2u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }
        warn!("Giving up on alert {} after {} attempts", alert.id, self.max_retries + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::rules::{Predicate, PredicateOp};
    use pulse_core::telemetry::{Severity, TelemetrySource, TelemetryType, TelemetryValue};
    use serde_json::json;

    fn cpu_rule() -> AlertRule {
        AlertRule {
            id: "high-cpu".into(),
            name: "High CPU".into(),
            predicates: vec![
                Predicate {
                    field: "name".into(),
                    op: PredicateOp::Contains,
                    operand: json!("cpu"),
                },
                Predicate {
                    field: "value".into(),
                    op: PredicateOp::Gt,
                    operand: json!(80),
                },
            ],
            severity: Severity::Warning,
            window_seconds: 300,
            fingerprint_fields: vec!["service_name".into()],
            enabled: true,
        }
    }

    fn item(name: &str, value: f64, service: &str) -> ProcessedTelemetry {
        let data = TelemetryData::new(
            TelemetryType::Gauge,
            TelemetrySource::System,
            name,
            TelemetryValue::Number(value),
        )
        .with_service(service);
        ProcessedTelemetry::begin(data)
    }

    #[tokio::test]
    async fn test_rule_fires_and_hands_off() {
        let (tx, mut rx) = mpsc::channel(8);
        let evaluator = AlertEvaluator::new(vec![cpu_rule()], tx);

        let alerts = evaluator.evaluate(&item("cpu_usage", 92.0, "api")).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, "high-cpu");
        assert_eq!(alerts[0].severity, Severity::Warning);

        let handed_off = rx.recv().await.unwrap();
        assert_eq!(handed_off.id, alerts[0].id);
    }

    #[tokio::test]
    async fn test_rule_does_not_fire_below_threshold() {
        let (tx, _rx) = mpsc::channel(8);
        let evaluator = AlertEvaluator::new(vec![cpu_rule()], tx);

        let alerts = evaluator.evaluate(&item("cpu_usage", 40.0, "api")).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_same_fingerprint_suppressed_within_window() {
        let (tx, _rx) = mpsc::channel(8);
        let evaluator = AlertEvaluator::new(vec![cpu_rule()], tx);

        let first = evaluator.evaluate(&item("cpu_usage", 92.0, "api")).await;
        let second = evaluator.evaluate(&item("cpu_usage", 95.0, "api")).await;
        assert_eq!(first.len(), 1);
        assert!(second.is_empty(), "same service within window must be suppressed");

        // A different service has a different fingerprint
        let other = evaluator.evaluate(&item("cpu_usage", 92.0, "worker")).await;
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let evaluator = AlertEvaluator::new(vec![cpu_rule()], tx);

        evaluator.evaluate(&item("cpu_usage", 92.0, "api")).await;
        // Channel now full; this evaluation must still return promptly
        let alerts = evaluator.evaluate(&item("cpu_usage", 92.0, "worker")).await;
        assert_eq!(alerts.len(), 1);
    }
}
