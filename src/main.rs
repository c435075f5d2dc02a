//! trip-recorder - motion-aware trip recording daemon
//!
//! Classifies the user's motion from location and activity samples, adjusts
//! the requested sensor accuracy to match, records trips to durable local
//! storage and uploads finalized trips to a remote object store.
//!
//! Module structure:
//! - `domain/` - Core types (samples, scenarios, archives, recorder messages)
//! - `io/` - External interfaces (storage, remote store, sample feed, status)
//! - `services/` - Business logic (classifier, state machine, session, recorder)
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use trip_recorder::domain::{SensorEvent, SensorEventKind};
use trip_recorder::infra::{Config, Metrics, SystemClock};
use trip_recorder::io::notice_channel::run_notice_logger;
use trip_recorder::io::{
    create_notice_channel, replay_file, start_feed_listener, start_status_server, ArchiveStore,
    CheckpointStore, FeedListenerConfig, HttpRemoteStore,
};
use trip_recorder::services::{
    create_upload_worker, Recorder, ScenarioStateMachine, Thresholds, TripSession, UploadReconciler,
};

/// trip-recorder - motion-aware trip recording daemon
#[derive(Parser, Debug)]
#[command(name = "trip-recorder", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Owner identity, overriding the config file
    #[arg(long)]
    owner: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-sample visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "trip-recorder starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let mut config = Config::load_from_path(&config_path);
    if args.owner.is_some() {
        config = config.with_owner_identity(args.owner.as_deref());
    }

    info!(
        config_file = %config.config_file(),
        owner = ?config.owner_identity(),
        storage_dir = %config.storage_dir().display(),
        remote = ?config.remote_base_url(),
        upload_interval_secs = %config.upload_interval_secs(),
        feed_replay = ?config.feed_replay_file(),
        feed_port = %config.feed_listener_port(),
        status_port = %config.status_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Local storage: checkpoints at the root, archives beneath
    let checkpoints = CheckpointStore::new(config.storage_dir());
    let archives = ArchiveStore::new(config.storage_dir().join("archives"));

    // Upload worker (only with a remote store configured)
    let uploads = match config.remote_base_url() {
        Some(base_url) => {
            let remote = HttpRemoteStore::new(
                base_url,
                Duration::from_millis(config.remote_timeout_ms()),
            )?;
            let reconciler = UploadReconciler::new(archives.clone(), Arc::new(remote));
            let interval = match config.upload_interval_secs() {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            };
            let (handle, worker) = create_upload_worker(
                reconciler,
                config.owner_identity().map(str::to_string),
                interval,
                metrics.clone(),
                1,
            );
            let worker_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                worker.run(worker_shutdown).await;
            });
            Some(handle)
        }
        None => {
            warn!("uploads_disabled: no remote base_url configured");
            None
        }
    };

    // Notices surface in the log until a UI is attached
    let (notices, notice_rx) = create_notice_channel(64);
    tokio::spawn(run_notice_logger(notice_rx, shutdown_rx.clone()));

    // Recorder (resumes a checkpointed trip on construction)
    let machine = ScenarioStateMachine::new(
        Thresholds::from_config(config.classifier()),
        Arc::new(SystemClock),
    );
    let session = TripSession::new(checkpoints, archives);
    let mut recorder = Recorder::new(
        machine,
        session,
        config.owner_identity().map(str::to_string),
        metrics.clone(),
        notices,
        uploads,
    );
    if config.auto_start() && !recorder.is_recording() {
        recorder.process_event(SensorEvent::new(SensorEventKind::StartTrip));
    }

    // Sensor control: log every directive change until a real sensor is attached
    let mut control = recorder.control();
    tokio::spawn(async move {
        while control.changed().await.is_ok() {
            let c = *control.borrow_and_update();
            info!(
                accuracy = %c.accuracy,
                updates_enabled = %c.updates_enabled,
                "sensor_control_updated"
            );
        }
    });

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(config.feed_channel_capacity());

    // Replay file, then the live listener
    if let Some(path) = config.feed_replay_file() {
        let path = std::path::PathBuf::from(path);
        let replay_tx = event_tx.clone();
        let replay_metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = replay_file(&path, &replay_tx, &replay_metrics).await {
                error!(error = %format!("{e:#}"), "replay_failed");
            }
        });
    }

    let feed_config = FeedListenerConfig {
        port: config.feed_listener_port(),
        enabled: config.feed_listener_enabled(),
    };
    let feed_metrics = metrics.clone();
    let feed_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            start_feed_listener(feed_config, event_tx, feed_metrics, feed_shutdown).await
        {
            error!(error = %format!("{e:#}"), "feed listener error");
        }
    });

    // Start status HTTP server (if port > 0)
    let status_port = config.status_port();
    if status_port > 0 {
        let status_metrics = metrics.clone();
        let status = recorder.status();
        let status_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_status_server(status_port, status_metrics, status, status_shutdown).await
            {
                error!(error = %format!("{e:#}"), "status server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run recorder - consumes events until shutdown or every feed is gone
    recorder.run(event_rx, shutdown_rx).await;

    info!("trip-recorder shutdown complete");
    Ok(())
}
