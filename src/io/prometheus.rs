//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics and a liveness
//! check at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_DWELL_BOUNDS, METRICS_NUM_BUCKETS,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_sample_metrics(&mut output, site_id, &summary);
    write_transition_metrics(&mut output, site_id, &summary);
    write_degraded_metrics(&mut output, site_id, &summary);

    output
}

fn write_sample_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_samples_total",
        "Total samples processed",
        MetricType::Counter,
        site,
        summary.samples_total,
    );
    let _ = writeln!(output, "# HELP geofence_samples_per_sec Samples processed per second");
    let _ = writeln!(output, "# TYPE geofence_samples_per_sec gauge");
    let _ = writeln!(
        output,
        "geofence_samples_per_sec{{site=\"{site}\"}} {:.2}",
        summary.samples_per_sec
    );

    write_histogram(
        output,
        "geofence_sample_latency_us",
        "Sample processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "geofence_sample_latency_p99_us",
        "99th percentile sample latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_transition_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_entries_total",
        "Entry events produced",
        MetricType::Counter,
        site,
        summary.entries_total,
    );
    write_metric(
        output,
        "geofence_exits_total",
        "Exit events produced",
        MetricType::Counter,
        site,
        summary.exits_total,
    );
    write_metric(
        output,
        "geofence_handoffs_total",
        "Samples moving a subject directly between regions",
        MetricType::Counter,
        site,
        summary.handoffs_total,
    );
    write_metric(
        output,
        "geofence_occupied_subjects",
        "Subjects currently inside a region",
        MetricType::Gauge,
        site,
        summary.occupied_subjects,
    );
    write_histogram(
        output,
        "geofence_visit_dwell_minutes",
        "Completed visit dwell in minutes",
        site,
        &summary.dwell_buckets,
        &METRICS_DWELL_BOUNDS,
        summary.dwell_avg_minutes,
    );
    write_metric(
        output,
        "geofence_events_persisted_total",
        "Events written by the sink",
        MetricType::Counter,
        site,
        summary.events_persisted,
    );
}

fn write_degraded_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_no_region_samples_total",
        "Samples for subjects with no regions configured",
        MetricType::Counter,
        site,
        summary.no_region_samples,
    );
    write_metric(
        output,
        "geofence_clock_fallbacks_total",
        "Samples timestamped with processing time",
        MetricType::Counter,
        site,
        summary.clock_fallbacks,
    );
    write_metric(
        output,
        "geofence_malformed_samples_total",
        "Input lines rejected at ingestion",
        MetricType::Counter,
        site,
        summary.malformed_samples,
    );
    write_metric(
        output,
        "geofence_samples_dropped_total",
        "Samples dropped by the dispatcher",
        MetricType::Counter,
        site,
        summary.samples_dropped,
    );
    write_metric(
        output,
        "geofence_emit_failures_total",
        "Events refused by the emitter",
        MetricType::Counter,
        site,
        summary.emit_failures,
    );
    write_metric(
        output,
        "geofence_persist_failures_total",
        "Events the sink failed to write",
        MetricType::Counter,
        site,
        summary.persist_failures,
    );
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut response =
                text_response(StatusCode::OK, format_prometheus_metrics(&metrics, &site_id));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok".to_string())),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found".to_string())),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
