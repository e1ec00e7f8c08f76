//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
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
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_observation_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);
    write_session_metrics(&mut output, site_id, &summary);
    write_occupancy_metrics(&mut output, site_id, &summary);
    write_failure_metrics(&mut output, site_id, &summary);

    output
}

fn write_observation_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_observations_total",
        "Total plate observations processed",
        MetricType::Counter,
        site,
        summary.observations_total,
    );
    write_metric(
        output,
        "parking_observations_suppressed_total",
        "Observations suppressed by deduplication",
        MetricType::Counter,
        site,
        summary.observations_suppressed,
    );
    let _ = writeln!(
        output,
        "# HELP parking_observations_per_sec Observations processed per second"
    );
    let _ = writeln!(output, "# TYPE parking_observations_per_sec gauge");
    let _ = writeln!(
        output,
        "parking_observations_per_sec{{site=\"{site}\"}} {:.2}",
        summary.observations_per_sec
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "parking_observation_latency_us",
        "Observation processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );

    write_metric(
        output,
        "parking_observation_latency_p50_us",
        "50th percentile observation latency",
        MetricType::Gauge,
        site,
        summary.lat_p50_us,
    );
    write_metric(
        output,
        "parking_observation_latency_p95_us",
        "95th percentile observation latency",
        MetricType::Gauge,
        site,
        summary.lat_p95_us,
    );
    write_metric(
        output,
        "parking_observation_latency_p99_us",
        "99th percentile observation latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_sessions_opened_total",
        "Sessions opened",
        MetricType::Counter,
        site,
        summary.sessions_opened,
    );
    write_metric(
        output,
        "parking_sessions_closed_total",
        "Sessions closed and billed",
        MetricType::Counter,
        site,
        summary.sessions_closed,
    );
    write_metric(
        output,
        "parking_sessions_paid_total",
        "Sessions marked paid",
        MetricType::Counter,
        site,
        summary.sessions_paid,
    );
    write_metric(
        output,
        "parking_fees_billed_cents_total",
        "Total fees billed in hundredths of the currency unit",
        MetricType::Counter,
        site,
        summary.fees_billed_cents,
    );
    write_metric(
        output,
        "parking_open_sessions",
        "Current open sessions",
        MetricType::Gauge,
        site,
        summary.open_sessions,
    );
}

fn write_occupancy_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_occupied_slots",
        "Current occupied slots",
        MetricType::Gauge,
        site,
        summary.occupied_slots,
    );
    write_metric(
        output,
        "parking_capacity_rejections_total",
        "Enters rejected because the lot was full",
        MetricType::Counter,
        site,
        summary.capacity_rejections,
    );
    write_metric(
        output,
        "parking_underflow_rejections_total",
        "Exits rejected because the count was already zero",
        MetricType::Counter,
        site,
        summary.underflow_rejections,
    );
    write_metric(
        output,
        "parking_dedup_tracked_plates",
        "Plates tracked in the dedup map",
        MetricType::Gauge,
        site,
        summary.dedup_tracked_plates,
    );
}

fn write_failure_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_store_errors_total",
        "Session store write failures",
        MetricType::Counter,
        site,
        summary.store_errors,
    );
    write_metric(
        output,
        "parking_ingest_events_dropped_total",
        "Ingest events dropped due to channel full",
        MetricType::Counter,
        site,
        summary.ingest_events_dropped,
    );
    write_metric(
        output,
        "parking_egress_messages_dropped_total",
        "Egress messages dropped due to channel full",
        MetricType::Counter,
        site,
        summary.egress_messages_dropped,
    );
    write_metric(
        output,
        "parking_event_queue_depth",
        "Current ingest queue depth",
        MetricType::Gauge,
        site,
        summary.event_queue_depth,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
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
