//! Recorder - the single processing context for sensor events
//!
//! The Recorder owns the scenario state machine and the trip session and
//! coordinates:
//! - Scenario classification and the accuracy requested from the sensor
//! - Trip lifecycle (start, append with checkpoint, finalize)
//! - Authorization handling (halt/resume updates, notify the user)
//! - Upload triggering after a trip is finalized
//!
//! Events arrive over one bounded channel, so no two samples are ever
//! processed concurrently.

mod handlers;

use crate::domain::archive::ANONYMOUS_OWNER;
use crate::domain::events::{
    RecorderNotice, RecorderStatus, SensorControl, SensorEvent, SensorEventKind,
};
use crate::domain::samples::AuthorizationStatus;
use crate::infra::metrics::Metrics;
use crate::io::notice_channel::NoticeSender;
use crate::io::storage::StorageError;
use crate::services::scenario_machine::ScenarioStateMachine;
use crate::services::trip_session::TripSession;
use crate::services::upload_worker::UploadHandle;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

pub struct Recorder {
    /// Scenario classification and hysteresis
    pub(crate) machine: ScenarioStateMachine,
    /// Open trip and its checkpoints
    pub(crate) session: TripSession,
    /// Identity archives are tagged with; `None` records anonymously and skips uploads
    pub(crate) owner: Option<String>,
    pub(crate) metrics: Arc<Metrics>,
    /// User-facing notices
    pub(crate) notices: NoticeSender,
    /// Upload trigger (optional, absent when no remote store is configured)
    pub(crate) uploads: Option<UploadHandle>,
    /// Last authorization reported by the platform
    pub(crate) authorization: Option<AuthorizationStatus>,
    pub(crate) updates_enabled: bool,
    pub(crate) last_fix_at: Option<DateTime<Utc>>,
    control_tx: watch::Sender<SensorControl>,
    status_tx: watch::Sender<RecorderStatus>,
}

impl Recorder {
    /// Build the recorder. A trip left open by a previous run is resumed here.
    pub fn new(
        machine: ScenarioStateMachine,
        session: TripSession,
        owner: Option<String>,
        metrics: Arc<Metrics>,
        notices: NoticeSender,
        uploads: Option<UploadHandle>,
    ) -> Self {
        let control = SensorControl { accuracy: machine.directive(), updates_enabled: true };
        let (control_tx, _) = watch::channel(control);
        let (status_tx, _) = watch::channel(RecorderStatus::default());

        let mut recorder = Self {
            machine,
            session,
            owner,
            metrics,
            notices,
            uploads,
            authorization: None,
            updates_enabled: true,
            last_fix_at: None,
            control_tx,
            status_tx,
        };

        if recorder.session.is_open() {
            info!("trip_checkpoint_found");
            recorder.start_trip();
        }
        recorder.publish_status();
        recorder
    }

    /// Sensor configuration; the sensor collaborator's only input
    pub fn control(&self) -> watch::Receiver<SensorControl> {
        self.control_tx.subscribe()
    }

    /// Status snapshots for the UI and the status endpoint
    pub fn status(&self) -> watch::Receiver<RecorderStatus> {
        self.status_tx.subscribe()
    }

    /// Current status without subscribing
    pub fn current_status(&self) -> RecorderStatus {
        self.status_tx.borrow().clone()
    }

    /// Consume events until the channel closes or shutdown is signalled.
    /// An open trip is left checkpointed for the next run.
    pub async fn run(
        &mut self,
        mut event_rx: mpsc::Receiver<SensorEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            owner = %self.owner.as_deref().unwrap_or(ANONYMOUS_OWNER),
            trip_open = %self.session.is_active(),
            "recorder_started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(e) => {
                            self.metrics.set_event_queue_depth(event_rx.len() as u64);
                            self.process_event(e);
                        }
                        None => break, // Channel closed
                    }
                }
            }
        }

        info!(
            trip_open = %self.session.is_active(),
            locations = %self.session.location_count(),
            "recorder_stopped"
        );
    }

    /// Process a single event, dispatching to the appropriate handler
    pub fn process_event(&mut self, event: SensorEvent) {
        let process_start = Instant::now();
        let queued_us = process_start.saturating_duration_since(event.received_at).as_micros();
        self.metrics.record_queue_delay(queued_us as u64);

        match event.kind {
            SensorEventKind::Location(sample) => self.handle_location(sample),
            SensorEventKind::Motion(sample) => self.handle_motion(sample),
            SensorEventKind::Authorization(status) => self.handle_authorization(status),
            SensorEventKind::StartTrip => self.start_trip(),
            SensorEventKind::StopTrip => self.stop_trip(),
        }
        self.publish_status();

        // Record processing latency (lock-free)
        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_active()
    }

    pub(crate) fn publish_control(&self) {
        let control = SensorControl {
            accuracy: self.machine.directive(),
            updates_enabled: self.updates_enabled,
        };
        self.control_tx.send_if_modified(|current| {
            if *current == control {
                false
            } else {
                *current = control;
                true
            }
        });
    }

    pub(crate) fn publish_status(&self) {
        let scenario = self.machine.scenario();
        let status = RecorderStatus {
            scenario,
            scenario_label: scenario.label(),
            directive: scenario.directive(),
            updates_enabled: self.updates_enabled,
            authorization: self.authorization,
            trip_open: self.session.is_active(),
            owner: self.session.owner().to_string(),
            locations: self.session.location_count(),
            motions: self.session.motion_count(),
            last_fix_at: self.last_fix_at,
        };
        self.status_tx.send_replace(status);
    }

    /// Log, count and surface a failed write; recording carries on
    pub(crate) fn persistence_failed(&self, operation: &'static str, e: StorageError) {
        self.metrics.record_storage_failure();
        error!(operation = %operation, error = %e, "persistence_failed");
        self.notices.send(RecorderNotice::PersistenceFailed { operation, error: e.to_string() });
    }
}
