//! Status HTTP endpoint
//!
//! - `/status` - current `RecorderStatus` as JSON
//! - `/metrics` - counters in Prometheus text format
//! - `/health` - liveness
//!
//! Uses hyper for the HTTP server.

use crate::domain::events::RecorderStatus;
use crate::infra::metrics::{Metrics, MetricsSnapshot, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
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

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

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

/// Write a simple metric (counter or gauge) with owner label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    owner: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{owner=\"{owner}\"}} {val}");
}

/// Write cumulative histogram buckets and the observation count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    owner: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{owner=\"{owner}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{owner=\"{owner}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_count{{owner=\"{owner}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(snapshot: &MetricsSnapshot, status: &RecorderStatus) -> String {
    let owner = status.owner.as_str();
    let mut output = String::with_capacity(4096);

    let counters: [(&str, &str, u64); 17] = [
        ("trip_recorder_locations_total", "Location fixes received", snapshot.locations_total),
        ("trip_recorder_locations_stale_total", "Stale fixes dropped", snapshot.locations_stale),
        (
            "trip_recorder_locations_halted_total",
            "Fixes ignored while updates were halted",
            snapshot.locations_halted,
        ),
        ("trip_recorder_motions_total", "Motion readings received", snapshot.motions_total),
        (
            "trip_recorder_motions_ignored_total",
            "Motion readings without usable evidence",
            snapshot.motions_ignored,
        ),
        ("trip_recorder_transitions_total", "Scenario transitions", snapshot.transitions_total),
        (
            "trip_recorder_checkpoint_writes_total",
            "Checkpoint rewrites",
            snapshot.checkpoint_writes,
        ),
        ("trip_recorder_storage_failures_total", "Failed local writes", snapshot.storage_failures),
        ("trip_recorder_trips_started_total", "Trips opened or resumed", snapshot.trips_started),
        ("trip_recorder_trips_finalized_total", "Trips finalized", snapshot.trips_finalized),
        (
            "trip_recorder_archives_written_total",
            "Archive files written",
            snapshot.archives_written,
        ),
        (
            "trip_recorder_reconcile_passes_total",
            "Completed upload passes",
            snapshot.reconcile_passes,
        ),
        (
            "trip_recorder_reconcile_aborted_total",
            "Upload passes aborted by listing errors",
            snapshot.reconcile_aborted,
        ),
        ("trip_recorder_uploads_total", "Archives uploaded", snapshot.uploads_ok),
        ("trip_recorder_upload_failures_total", "Archive upload failures", snapshot.uploads_failed),
        (
            "trip_recorder_feed_dropped_total",
            "Feed events dropped on a full channel",
            snapshot.feed_events_dropped,
        ),
        (
            "trip_recorder_feed_parse_errors_total",
            "Unparseable feed lines",
            snapshot.feed_parse_errors,
        ),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, owner, val);
    }

    write_metric(
        &mut output,
        "trip_recorder_event_queue_depth",
        "Sensor events waiting for the recorder",
        MetricType::Gauge,
        owner,
        snapshot.event_queue_depth,
    );
    write_metric(
        &mut output,
        "trip_recorder_trip_open",
        "1 while a trip is being recorded",
        MetricType::Gauge,
        owner,
        status.trip_open as u64,
    );
    write_metric(
        &mut output,
        "trip_recorder_trip_locations",
        "Fixes in the open trip",
        MetricType::Gauge,
        owner,
        status.locations as u64,
    );
    write_metric(
        &mut output,
        "trip_recorder_updates_enabled",
        "1 while location updates are enabled",
        MetricType::Gauge,
        owner,
        status.updates_enabled as u64,
    );
    write_metric(
        &mut output,
        "trip_recorder_accuracy_metres",
        "Accuracy currently requested from the sensor",
        MetricType::Gauge,
        owner,
        status.directive.nominal_metres() as u64,
    );

    write_histogram(
        &mut output,
        "trip_recorder_event_latency_us",
        "Event processing latency in microseconds since the last periodic report",
        owner,
        &snapshot.pending_latency_buckets,
    );

    output
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Route one request
fn route(
    method: &Method,
    path: &str,
    metrics: &Metrics,
    status: &watch::Receiver<RecorderStatus>,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/status") => {
            let snapshot = status.borrow().clone();
            match serde_json::to_vec(&snapshot) {
                Ok(body) => respond(StatusCode::OK, "application/json", body),
                Err(e) => {
                    error!(error = %e, "status_serialize_failed");
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "status unavailable")
                }
            }
        }
        (&Method::GET, "/metrics") => {
            let snapshot = status.borrow().clone();
            let body = format_prometheus_metrics(&metrics.snapshot(), &snapshot);
            respond(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body)
        }
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    status: watch::Receiver<RecorderStatus>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &metrics, &status))
}

/// Start the status HTTP server
pub async fn start_status_server(
    port: u16,
    metrics: Arc<Metrics>,
    status: watch::Receiver<RecorderStatus>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("binding status server on {addr}"))?;
    serve_status(listener, metrics, status, shutdown).await
}

/// Serve on an already-bound listener until shutdown
pub async fn serve_status(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    status: watch::Receiver<RecorderStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "status_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let status = status.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let status = status.clone();
                                async move { handle_request(req, metrics, status).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "status_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "status_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("status_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_event_processed(150);
        metrics.record_event_processed(250);
        metrics.record_location();
        metrics.record_transition();

        let status = RecorderStatus { trip_open: true, locations: 7, ..Default::default() };
        let output = format_prometheus_metrics(&metrics.snapshot(), &status);

        assert!(output.contains("trip_recorder_locations_total{owner=\"anonymous\"} 1"));
        assert!(output.contains("trip_recorder_transitions_total{owner=\"anonymous\"} 1"));
        assert!(output.contains("trip_recorder_trip_open{owner=\"anonymous\"} 1"));
        assert!(output.contains("trip_recorder_trip_locations{owner=\"anonymous\"} 7"));
        assert!(output.contains("trip_recorder_accuracy_metres{owner=\"anonymous\"} 10"));
        assert!(output
            .contains("trip_recorder_event_latency_us_bucket{owner=\"anonymous\",le=\"+Inf\"} 2"));
    }

    #[tokio::test]
    async fn test_routes() {
        let metrics = Metrics::new();
        let (_tx, status) = watch::channel(RecorderStatus::default());

        let response = route(&Method::GET, "/status", &metrics, &status);
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["scenario_label"], "Actively moving");
        assert_eq!(json["trip_open"], false);

        let response = route(&Method::GET, "/health", &metrics, &status);
        assert_eq!(body_string(response).await, "ok");

        let response = route(&Method::GET, "/metrics", &metrics, &status);
        assert_eq!(response.headers()[CONTENT_TYPE], PROMETHEUS_CONTENT_TYPE);

        let response = route(&Method::POST, "/status", &metrics, &status);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
