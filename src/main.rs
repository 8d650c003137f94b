//! Geofence engine - streams positional samples through the transition detector
//!
//! Reads JSONL samples from a file or stdin, detects region entries and exits
//! per subject, and appends the resulting events to a JSONL log.
//!
//! Module structure:
//! - `domain/` - Core types (Region, Coordinate, TransitionEvent) and geodesy
//! - `io/` - External interfaces (sample ingest, region registry, event sink, Prometheus)
//! - `services/` - Business logic (TransitionDetector, dispatcher, visit summaries)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use geofence_engine::infra::{Config, Metrics};
use geofence_engine::io::{
    create_event_channel, run_sink, start_metrics_server, JsonlEventSink, RegionRegistry,
};
use geofence_engine::services::{SampleDispatcher, TransitionDetector, VisitLedger};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence engine - region entry/exit detection for positional samples
#[derive(Parser, Debug)]
#[command(name = "geofence-engine", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// JSONL sample file (overrides `[ingest] file`; stdin when neither is set)
    #[arg(short, long)]
    input: Option<String>,

    /// Discard any stored occupancy before processing
    #[arg(long)]
    reset_on_start: bool,
}

/// Top places logged per subject at shutdown
const SUMMARY_PLACES: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-sample visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("geofence-engine starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        sample_interval_secs = %config.sample_interval_secs(),
        exit_time_policy = %config.exit_time_policy().as_str(),
        exit_margin_secs = %config.exit_margin_secs(),
        regions_file = %config.regions_file(),
        shards = %config.shards(),
        egress_file = %config.egress_file(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let registry = match RegionRegistry::from_file(
        config.regions_file(),
        config.include_inactive_regions(),
    ) {
        Ok(registry) => registry,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "region_registry_unavailable_using_empty");
            RegionRegistry::new()
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let ledger = Arc::new(VisitLedger::new());

    // Event sink drains the emitter channel until the detector is dropped
    let (emitter, event_rx) = create_event_channel(config.egress_channel_capacity());
    let sink = JsonlEventSink::new(config.egress_file());
    let sink_handle = tokio::spawn(run_sink(event_rx, sink, metrics.clone(), Some(ledger.clone())));

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_metrics_server(prometheus_port, prom_metrics, prom_site, prom_shutdown).await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Periodic metrics reporter
    let reporter_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => reporter_metrics.report().log(),
                _ = reporter_shutdown.changed() => break,
            }
        }
    });

    let detector = Arc::new(
        TransitionDetector::new(config.detector_config(), metrics.clone())
            .with_emitter(Arc::new(emitter)),
    );
    if args.reset_on_start {
        detector.reset_all();
    }

    let dispatcher = SampleDispatcher::start(
        detector.clone(),
        Arc::new(registry),
        metrics.clone(),
        config.shards(),
        config.queue_capacity(),
    );

    let input = args.input.or_else(|| config.ingest_file().map(str::to_string));
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input.as_deref() {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open sample input {path}"))?;
            info!(input = %path, "sample_input_opened");
            Box::new(BufReader::new(file))
        }
        None => {
            info!("sample_input_stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    tokio::select! {
        result = dispatcher.feed(reader) => {
            if let Err(e) = result {
                error!(error = %e, "sample_input_read_failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
        }
    }

    // Drain shards, then drop the last emitter handle so the sink can finish
    dispatcher.shutdown().await;
    info!(occupied_subjects = %detector.occupied_subjects(), "detection_stopped");
    drop(detector);
    if let Err(e) = sink_handle.await {
        error!(error = %e, "event_sink_join_failed");
    }

    let _ = shutdown_tx.send(true);
    let _ = reporter.await;

    metrics.report().log();
    ledger.log_summaries(SUMMARY_PLACES);

    info!("geofence-engine shutdown complete");
    Ok(())
}
