//! Pulse - real-time telemetry correlation pipeline
//!
//! Wires the collector, pillar processors, correlation engine, analyzer,
//! backpressure handler, and streaming layer into one daemon.

use clap::{Parser, Subcommand};
use pulse_analyze::{AlertEvaluator, AlertWebhook, Analyzer, AnalyzerConfig};
use pulse_collect::{Collector, CollectorConfig};
use pulse_core::config::PulseConfig;
use pulse_core::metrics::create_metrics;
use pulse_core::pipeline::{Pipeline, PipelineConfig};
use pulse_correlate::{CorrelationConfig, CorrelationEngine};
use pulse_process::{
    EventsProcessor, HostEnricher, LogsProcessor, MetricsProcessor, TracesProcessor,
};
use pulse_stream::{
    BackpressureConfig, BackpressureHandler, ConnectionManager, StreamHandler, StreamManager,
    StreamRouter, StreamingConfig, TokenAuth,
};
use pulse_web::{AppState, WebConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "pulsed")]
#[command(version)]
#[command(about = "Real-time telemetry correlation pipeline", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and API server
    Run {
        /// Listen port, overriding the configuration file
        #[arg(long)]
        port: Option<u16>,

        /// Shared auth token for WebSocket clients
        #[arg(long, env = "PULSE_AUTH_TOKEN", default_value = "pulse")]
        auth_token: String,
    },

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = PulseConfig::discover(cli.config.as_deref())?;

    // CLI verbose flag takes precedence over the config file
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.server.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { port, auth_token } => run(config, port, auth_token).await,
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(mut config: PulseConfig, port: Option<u16>, auth_token: String) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    let metrics = create_metrics();

    // Pipeline core: processors, enricher, correlator, analyzer
    let mut pipeline = Pipeline::new(
        PipelineConfig {
            batch_buffer_size: config.collector.batch_channel_capacity,
            ..PipelineConfig::default()
        },
        metrics.clone(),
    );
    pipeline.add_processor(Arc::new(MetricsProcessor::new()));
    pipeline.add_processor(Arc::new(EventsProcessor::new()));
    pipeline.add_processor(Arc::new(LogsProcessor::new()));
    pipeline.add_processor(Arc::new(TracesProcessor::new()));
    pipeline.add_enricher(Arc::new(HostEnricher::new()));

    let correlator = Arc::new(CorrelationEngine::new(
        CorrelationConfig {
            window_ms: config.correlation.window_ms,
            max_candidates: config.correlation.max_candidates,
        },
        config.correlation.rules.clone(),
    ));
    pipeline.set_correlator(correlator.clone());

    let analyzer = Arc::new(Analyzer::new(
        AnalyzerConfig {
            series_capacity: config.analysis.series_capacity,
            max_history: config.analysis.max_history,
        },
        config.analysis.patterns.clone(),
    ));
    pipeline.set_analyzer(analyzer.clone());

    // Streaming layer behind the backpressure queue
    let connections = ConnectionManager::new(config.streaming.clone(), metrics.clone());
    connections.start();
    let streams = StreamManager::new(StreamingConfig::from(&config.streaming), connections.clone());
    streams.start();

    let backpressure = BackpressureHandler::new(BackpressureConfig::from_settings(
        &config.backpressure,
    )?);
    backpressure.start(StreamRouter::new(streams.clone()));
    pipeline.add_sink(backpressure.clone());

    // Alerting: evaluator taps the pipeline output, webhook drains the
    // handoff channel if configured
    let (alert_tx, alert_rx) = tokio::sync::mpsc::channel(config.alerts.channel_capacity);
    let alert_evaluator = Arc::new(AlertEvaluator::new(config.alerts.rules.clone(), alert_tx));
    if let Some(url) = config.alerts.webhook_url.clone() {
        let webhook = AlertWebhook::new(
            url,
            Duration::from_secs(config.alerts.webhook_timeout_seconds),
            config.alerts.webhook_max_retries,
        );
        tokio::spawn(webhook.run(alert_rx));
    } else {
        // Keep the channel alive so the evaluator's handoff never errors
        tokio::spawn(drain_alerts(alert_rx));
    }
    spawn_alert_tap(&pipeline, alert_evaluator.clone());

    pipeline.start().await?;

    // Collector feeds the pipeline's batch channel
    let collector = Collector::new(
        CollectorConfig {
            rate_per_second: config.collector.rate_per_second,
            max_batch_size: config.collector.max_batch_size,
            batch_timeout: Duration::from_secs_f64(config.collector.batch_timeout_seconds),
            dedup_window: Duration::from_secs(config.collector.dedup_window_seconds),
            ..CollectorConfig::default()
        },
        pipeline.batch_sender(),
        metrics.clone(),
    );
    collector.start();

    let stream_handler = StreamHandler::new(
        streams.clone(),
        connections.clone(),
        Arc::new(TokenAuth::new(auth_token)),
        config.streaming.max_message_size,
    );

    let state = Arc::new(AppState {
        collector: collector.clone(),
        stream_handler,
        streams: streams.clone(),
        connections: connections.clone(),
        backpressure: backpressure.clone(),
        metrics,
    });
    let web_config = WebConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    tokio::spawn(async move {
        if let Err(e) = pulse_web::start_server(web_config, state).await {
            error!("Web server error: {e}");
        }
    });

    info!("Pulse v{} running, press Ctrl+C to stop", env!("CARGO_PKG_VERSION"));
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    collector.stop().await;
    pipeline.stop().await;
    backpressure.stop();
    streams.stop();
    connections.stop();
    info!("Pulse stopped");
    Ok(())
}

/// Subscribe an alert evaluator to the pipeline output fan-out
fn spawn_alert_tap(pipeline: &Pipeline, evaluator: Arc<AlertEvaluator>) {
    let mut rx = pipeline.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(pulse_core::pipeline::PipelineOutput::Processed(item)) => {
                    evaluator.evaluate(&item).await;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Alert tap lagged by {n} items");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Swallow alerts when no webhook is configured
async fn drain_alerts(mut rx: tokio::sync::mpsc::Receiver<pulse_core::rules::Alert>) {
    while let Some(alert) = rx.recv().await {
        info!("Alert {}: {}", alert.severity.as_str(), alert.title);
    }
}
