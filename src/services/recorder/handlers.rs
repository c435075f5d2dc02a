//! Event handlers for the Recorder
//!
//! Each handler processes one event kind, updating classifier and session
//! state and triggering side effects (sensor control, notices, uploads).

use super::Recorder;
use crate::domain::events::RecorderNotice;
use crate::domain::samples::{AuthorizationStatus, LocationSample, MotionSample};
use crate::services::upload_worker::UploadReason;
use tracing::{debug, info, warn};

impl Recorder {
    /// Handle a location fix
    ///
    /// Stale fixes are counted and dropped. Accepted fixes may move the
    /// scenario and are appended to the open trip.
    pub(crate) fn handle_location(&mut self, sample: LocationSample) {
        if !self.updates_enabled {
            self.metrics.record_location_halted();
            debug!("location_ignored_updates_halted");
            return;
        }
        self.metrics.record_location();

        let Some(update) = self.machine.on_location(&sample) else {
            self.metrics.record_location_stale();
            return;
        };

        if update.transitioned() {
            self.metrics.record_transition();
            self.publish_control();
        }
        self.last_fix_at = Some(sample.timestamp);

        if self.session.is_active() {
            match self.session.append_location(sample) {
                Ok(()) => self.metrics.record_checkpoint_write(),
                Err(e) => self.persistence_failed("append_location", e),
            }
        }
    }

    /// Handle a motion-activity reading
    pub(crate) fn handle_motion(&mut self, sample: MotionSample) {
        let applied = self.machine.on_motion(&sample);
        self.metrics.record_motion(applied);

        if applied && self.session.is_active() {
            match self.session.append_motion(sample) {
                Ok(true) => self.metrics.record_checkpoint_write(),
                Ok(false) => {}
                Err(e) => self.persistence_failed("append_motion", e),
            }
        }
    }

    /// Handle a change in location permission
    ///
    /// Refusal halts updates and tells the user; recorded data is kept.
    /// A grant resumes updates.
    pub(crate) fn handle_authorization(&mut self, status: AuthorizationStatus) {
        let previous = self.authorization.replace(status);
        if previous == Some(status) {
            return;
        }

        if status.is_refused() {
            if self.updates_enabled {
                self.updates_enabled = false;
                self.publish_control();
            }
            warn!(
                status = %status.as_str(),
                trip_open = %self.session.is_active(),
                "location_updates_halted"
            );
            self.notices.send(RecorderNotice::AuthorizationRevoked { status });
        } else if status.is_granted() {
            if !self.updates_enabled {
                self.updates_enabled = true;
                self.publish_control();
                info!(status = %status.as_str(), "location_updates_resumed");
            }
        } else {
            debug!(status = %status.as_str(), "authorization_pending");
        }
    }

    /// Open a trip, resuming checkpointed data when present
    pub(crate) fn start_trip(&mut self) {
        if self.session.is_active() {
            debug!("trip_start_ignored_already_open");
            return;
        }
        match self.session.start(self.owner.as_deref()) {
            Ok(()) => self.metrics.record_trip_started(),
            Err(e) => self.persistence_failed("start_trip", e),
        }
    }

    /// Finalize the open trip and request an upload pass
    pub(crate) fn stop_trip(&mut self) {
        if !self.session.is_active() {
            debug!("trip_stop_ignored_not_open");
            return;
        }
        match self.session.stop() {
            Ok(archives) => {
                self.metrics.record_trip_finalized(archives.len());
                if !archives.is_empty() {
                    if let Some(ref uploads) = self.uploads {
                        uploads.request(UploadReason::TripStopped);
                    }
                }
            }
            Err(e) => self.persistence_failed("stop_trip", e),
        }
    }
}
