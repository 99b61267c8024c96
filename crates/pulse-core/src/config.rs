//! Configuration system for Pulse
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Rule/pattern configuration schema
//! - Validation

use crate::rules::{AlertRule, AnalysisPattern, CorrelationRule};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Server settings
    pub server: ServerSettings,

    /// Collector settings
    pub collector: CollectorSettings,

    /// Correlation settings
    pub correlation: CorrelationSettings,

    /// Analysis settings
    pub analysis: AnalysisSettings,

    /// Backpressure settings
    pub backpressure: BackpressureSettings,

    /// Streaming settings
    pub streaming: StreamingSettings,

    /// Alerting settings
    pub alerts: AlertSettings,
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Listen host for the web server
    pub host: String,

    /// Listen port for the web server
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8686,
        }
    }
}

/// Collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Token-bucket rate limit, items per second
    pub rate_per_second: f64,

    /// Flush the ingestion batch at this size
    pub max_batch_size: usize,

    /// Flush the ingestion batch after this many seconds
    pub batch_timeout_seconds: f64,

    /// Deduplication cache TTL in seconds
    pub dedup_window_seconds: u64,

    /// Channel capacity between collector and processors
    pub batch_channel_capacity: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            rate_per_second: 1000.0,
            max_batch_size: 100,
            batch_timeout_seconds: 1.0,
            dedup_window_seconds: 300,
            batch_channel_capacity: 64,
        }
    }
}

/// Correlation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// Sliding window length in milliseconds
    pub window_ms: u64,

    /// Maximum candidates held in the window
    pub max_candidates: usize,

    /// Correlation rules; empty means ship the built-in defaults
    pub rules: Vec<CorrelationRule>,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            window_ms: 5000,
            max_candidates: 10000,
            rules: Vec::new(),
        }
    }
}

/// Analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Maximum points kept per series
    pub series_capacity: usize,

    /// Maximum analysis results kept in history
    pub max_history: usize,

    /// Analysis patterns; empty means ship the built-in defaults
    pub patterns: Vec<AnalysisPattern>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            series_capacity: 10000,
            max_history: 1000,
            patterns: Vec::new(),
        }
    }
}

/// Backpressure settings
///
/// The adaptive cutoffs and rate factors are empirically chosen defaults,
/// tunable here rather than contractual.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureSettings {
    /// Strategy: drop_oldest, drop_newest, throttle, buffer, reject, adaptive
    pub strategy: String,

    /// Bounded queue capacity
    pub max_queue_size: usize,

    /// Utilization above which drop/reject strategies engage
    pub drop_threshold: f64,

    /// Throttle/adaptive rate ceiling, items per second
    pub max_rate_per_second: f64,

    /// Load monitor sampling interval in seconds
    pub monitor_interval_seconds: f64,

    /// Occupancy fraction classified as high load
    pub high_occupancy: f64,

    /// Occupancy fraction classified as critical load
    pub critical_occupancy: f64,

    /// Rate multiplier applied at critical load
    pub critical_rate_factor: f64,

    /// Rate multiplier applied at high load
    pub high_rate_factor: f64,

    /// Rate multiplier applied while recovering at medium load
    pub recovery_rate_factor: f64,

    /// Rate multiplier applied at low load
    pub relax_rate_factor: f64,

    /// Estimated bytes per queued item, for the memory signal
    pub estimated_item_bytes: usize,
}

impl Default for BackpressureSettings {
    fn default() -> Self {
        Self {
            strategy: "adaptive".to_string(),
            max_queue_size: 10000,
            drop_threshold: 0.9,
            max_rate_per_second: 5000.0,
            monitor_interval_seconds: 2.0,
            high_occupancy: 0.70,
            critical_occupancy: 0.85,
            critical_rate_factor: 0.8,
            high_rate_factor: 0.9,
            recovery_rate_factor: 1.05,
            relax_rate_factor: 1.1,
            estimated_item_bytes: 1024,
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Per-stream circular buffer capacity
    pub buffer_size: usize,

    /// Batch size that forces a flush
    pub batch_size: usize,

    /// Flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Maximum subscribers per stream
    pub max_subscribers: usize,

    /// Maximum concurrent connections per user
    pub max_connections_per_user: usize,

    /// Maximum inbound message size in bytes
    pub max_message_size: usize,

    /// Disconnect connections idle longer than this
    pub idle_timeout_seconds: u64,

    /// Connection cleanup interval in seconds
    pub cleanup_interval_seconds: u64,

    /// Snapshot size sent to new subscribers
    pub snapshot_size: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            batch_size: 50,
            flush_interval_ms: 250,
            max_subscribers: 100,
            max_connections_per_user: 5,
            max_message_size: 1024 * 1024,
            idle_timeout_seconds: 300,
            cleanup_interval_seconds: 30,
            snapshot_size: 50,
        }
    }
}

/// Alerting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Alert rules evaluated against analysis output
    pub rules: Vec<AlertRule>,

    /// Outbound handoff channel capacity
    pub channel_capacity: usize,

    /// Optional webhook endpoint for the alert handoff
    pub webhook_url: Option<String>,

    /// Webhook request timeout in seconds
    pub webhook_timeout_seconds: u64,

    /// Maximum webhook retries
    pub webhook_max_retries: u32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            channel_capacity: 256,
            webhook_url: None,
            webhook_timeout_seconds: 10,
            webhook_max_retries: 3,
        }
    }
}

impl PulseConfig {
    /// Load configuration from an explicit path
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: PulseConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Discover and load configuration
    ///
    /// Order: explicit path, `PULSE_CONFIG` env var, `pulse/config.toml`
    /// under the platform config directory, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var("PULSE_CONFIG") {
            return Self::load(Path::new(&env_path));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let candidate = config_dir.join("pulse").join("config.toml");
            if candidate.exists() {
                return Self::load(&candidate);
            }
            debug!("No config at {}, using defaults", candidate.display());
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides for the common knobs
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("PULSE_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Ok(port) = std::env::var("PULSE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(rate) = std::env::var("PULSE_RATE_LIMIT") {
            if let Ok(rate) = rate.parse() {
                self.collector.rate_per_second = rate;
            }
        }
        if let Ok(url) = std::env::var("PULSE_ALERT_WEBHOOK") {
            self.alerts.webhook_url = Some(url);
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if self.collector.rate_per_second <= 0.0 {
            return Err(ConfigError::ValidationError(
                "collector.rate_per_second must be positive".to_string(),
            ));
        }
        if self.collector.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "collector.max_batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backpressure.drop_threshold) {
            return Err(ConfigError::ValidationError(
                "backpressure.drop_threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.backpressure.max_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "backpressure.max_queue_size must be at least 1".to_string(),
            ));
        }
        let valid_strategies = [
            "drop_oldest",
            "drop_newest",
            "throttle",
            "buffer",
            "reject",
            "adaptive",
        ];
        if !valid_strategies.contains(&self.backpressure.strategy.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown backpressure strategy: {}",
                self.backpressure.strategy
            )));
        }
        for rule in &self.correlation.rules {
            if !(0.0..=1.0).contains(&rule.similarity_threshold) {
                return Err(ConfigError::ValidationError(format!(
                    "correlation rule '{}': similarity_threshold must be in [0, 1]",
                    rule.id
                )));
            }
        }
        if self.streaming.batch_size == 0 || self.streaming.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.batch_size and streaming.buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
