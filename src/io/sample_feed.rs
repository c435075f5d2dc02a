//! Sensor sample feed
//!
//! Stand-in for the platform's location and motion callbacks. Events are
//! newline-delimited JSON tagged by `type`:
//!
//! ```text
//! {"type":"location","lat":43.47,"lon":-80.54,"speed":1.2,"accuracy":5.0}
//! {"type":"motion","activity":"walking","confidence":"high"}
//! {"type":"authorization","status":"denied"}
//! {"type":"start_trip"}
//! {"type":"stop_trip"}
//! ```
//!
//! `timestamp` (unix seconds) is optional on samples; absent means "now".
//! Lines come from a replay file or a TCP line listener. Unparseable lines
//! are logged and skipped.

use crate::domain::events::{SensorEvent, SensorEventKind};
use crate::domain::samples::{
    AuthorizationStatus, Confidence, LocationSample, MotionKind, MotionSample,
};
use crate::infra::metrics::Metrics;
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Sample listener configuration
#[derive(Debug, Clone)]
pub struct FeedListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for FeedListenerConfig {
    fn default() -> Self {
        Self { port: 7070, enabled: true }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedLine {
    Location {
        lat: f64,
        lon: f64,
        #[serde(default)]
        heading: f64,
        #[serde(default)]
        speed: f64,
        #[serde(default)]
        accuracy: f64,
        #[serde(default)]
        speed_accuracy: Option<f64>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Motion {
        activity: MotionKind,
        #[serde(default = "default_confidence")]
        confidence: Confidence,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Authorization {
        status: AuthorizationStatus,
    },
    StartTrip,
    StopTrip,
}

fn default_confidence() -> Confidence {
    Confidence::High
}

/// Parse one feed line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_feed_line(line: &str, now: DateTime<Utc>) -> anyhow::Result<Option<SensorEventKind>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parsed: FeedLine = serde_json::from_str(line)?;
    let at = |ts: Option<i64>| -> anyhow::Result<DateTime<Utc>> {
        match ts {
            Some(secs) => Utc
                .timestamp_opt(secs, 0)
                .single()
                .with_context(|| format!("timestamp out of range: {secs}")),
            None => Ok(now),
        }
    };

    let kind = match parsed {
        FeedLine::Location { lat, lon, heading, speed, accuracy, speed_accuracy, timestamp } => {
            SensorEventKind::Location(
                LocationSample::new(lat, lon, at(timestamp)?)
                    .with_heading(heading)
                    .with_speed(speed, speed_accuracy)
                    .with_accuracy(accuracy),
            )
        }
        FeedLine::Motion { activity, confidence, timestamp } => {
            SensorEventKind::Motion(MotionSample::new(activity, confidence, at(timestamp)?))
        }
        FeedLine::Authorization { status } => SensorEventKind::Authorization(status),
        FeedLine::StartTrip => SensorEventKind::StartTrip,
        FeedLine::StopTrip => SensorEventKind::StopTrip,
    };
    Ok(Some(kind))
}

/// Replay a JSONL file into the recorder
///
/// Waits for channel capacity instead of dropping; a file has no producer
/// that could be stalled. Returns the number of events delivered.
pub async fn replay_file(
    path: &Path,
    event_tx: &mpsc::Sender<SensorEvent>,
    metrics: &Metrics,
) -> anyhow::Result<usize> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening replay file {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut delivered = 0;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_feed_line(&line, Utc::now()) {
            Ok(Some(kind)) => {
                if event_tx.send(SensorEvent::new(kind)).await.is_err() {
                    warn!("replay_stopped: recorder gone");
                    break;
                }
                delivered += 1;
            }
            Ok(None) => {}
            Err(e) => {
                metrics.record_feed_parse_error();
                warn!(line = %line_no, error = %e, "feed_line_invalid");
            }
        }
    }

    info!(file = %path.display(), events = %delivered, "replay_completed");
    Ok(delivered)
}

/// Start the sample TCP listener
///
/// Each connection streams feed lines. Events are sent via try_send to avoid
/// blocking - drops are counted in metrics.
pub async fn start_feed_listener(
    config: FeedListenerConfig,
    event_tx: mpsc::Sender<SensorEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("feed_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener =
        TcpListener::bind(&addr).await.with_context(|| format!("binding feed listener on {addr}"))?;

    info!(port = %config.port, "feed_listener_started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("feed_listener_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let tx = event_tx.clone();
                        let m = metrics.clone();
                        tokio::spawn(async move {
                            handle_feed_connection(socket, addr, tx, m).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "feed_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_feed_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::Sender<SensorEvent>,
    metrics: Arc<Metrics>,
) {
    let peer = addr.to_string();
    debug!(peer = %peer, "feed_connection_accepted");

    let mut lines = BufReader::new(socket).lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    while let Ok(Some(line)) = lines.next_line().await {
        let kind = match parse_feed_line(&line, Utc::now()) {
            Ok(Some(kind)) => kind,
            Ok(None) => continue,
            Err(e) => {
                metrics.record_feed_parse_error();
                warn!(peer = %peer, error = %e, "feed_line_invalid");
                continue;
            }
        };

        match event_tx.try_send(SensorEvent::new(kind)) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics.record_feed_event_dropped();
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(
                        peer = %peer,
                        kind = %event.kind.as_str(),
                        "feed_event_dropped: channel full"
                    );
                    last_drop_warn = Instant::now();
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!(peer = %peer, "feed_event_channel_closed");
                break;
            }
        }
    }

    debug!(peer = %peer, "feed_connection_closed");
}
