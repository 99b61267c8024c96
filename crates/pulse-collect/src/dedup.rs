//! Deduplication cache for the collector
//!
//! Keys fold the identity of a data point down to the minute so repeated
//! submissions of the same logical point are no-ops within the window.

use pulse_core::telemetry::TelemetryData;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Build the dedup key for a data point
///
/// Key = type + source + name + value + service + host + timestamp rounded
/// to the minute.
pub fn dedup_key(data: &TelemetryData) -> String {
    let minute = data.timestamp.timestamp() / 60;
    format!(
        "{}|{:?}|{}|{}|{}|{}|{}",
        data.telemetry_type.as_str(),
        data.source,
        data.name,
        data.value.dedup_repr(),
        data.service_name.as_deref().unwrap_or(""),
        data.host_name.as_deref().unwrap_or(""),
        minute,
    )
}

/// In-process recency cache with TTL
#[derive(Debug)]
pub struct DedupCache {
    entries: HashMap<String, Instant>,
    ttl: Duration,
    /// Prune when the map grows past this many entries
    prune_watermark: usize,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            prune_watermark: 100_000,
        }
    }

    /// Record the key if unseen within the TTL
    ///
    /// Returns `true` if the key is new (the item should be accepted),
    /// `false` if it is a duplicate.
    pub fn insert_if_absent(&mut self, key: String) -> bool {
        let now = Instant::now();

        if let Some(seen_at) = self.entries.get(&key) {
            if now.duration_since(*seen_at) < self.ttl {
                return false;
            }
        }

        self.entries.insert(key, now);
        if self.entries.len() > self.prune_watermark {
            self.prune(now);
        }
        true
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::telemetry::{TelemetrySource, TelemetryType, TelemetryValue};

    fn sample() -> TelemetryData {
        TelemetryData::new(
            TelemetryType::Gauge,
            TelemetrySource::System,
            "cpu_usage",
            TelemetryValue::Number(85.0),
        )
        .with_service("api")
        .with_host("web-1")
    }

    #[test]
    fn test_duplicate_within_ttl_rejected() {
        let mut cache = DedupCache::new(Duration::from_secs(60));
        let key = dedup_key(&sample());

        assert!(cache.insert_if_absent(key.clone()));
        assert!(!cache.insert_if_absent(key));
    }

    #[test]
    fn test_expired_entry_accepted_again() {
        let mut cache = DedupCache::new(Duration::from_millis(0));
        let key = dedup_key(&sample());

        assert!(cache.insert_if_absent(key.clone()));
        // TTL of zero: the entry is immediately stale
        assert!(cache.insert_if_absent(key));
    }

    #[test]
    fn test_key_ignores_sub_minute_timestamp_difference() {
        let a = sample();
        let mut b = sample();
        // Same minute, different second
        b.timestamp = a.timestamp + chrono::Duration::seconds(10);
        // Round both into the same minute bucket for a deterministic test
        if a.timestamp.timestamp() / 60 == b.timestamp.timestamp() / 60 {
            assert_eq!(dedup_key(&a), dedup_key(&b));
        }
    }

    #[test]
    fn test_key_distinguishes_value() {
        let a = sample();
        let mut b = sample();
        b.value = TelemetryValue::Number(86.0);
        assert_ne!(dedup_key(&a), dedup_key(&b));
    }
}
