//! Upload worker - runs reconciliation passes off the recording path
//!
//! The recorder never waits on the network. It drops a trigger into a small
//! channel when a trip finalizes and moves on; this worker runs the pass.
//! A periodic tick retries anything a previous pass failed to upload.

use crate::infra::metrics::Metrics;
use crate::services::reconciler::{ReconcileReport, UploadReconciler};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Why a pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    TripStopped,
    Periodic,
    Manual,
}

impl UploadReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadReason::TripStopped => "trip_stopped",
            UploadReason::Periodic => "periodic",
            UploadReason::Manual => "manual",
        }
    }
}

/// A pass request queued for the worker
#[derive(Debug)]
pub struct UploadRequest {
    pub reason: UploadReason,
    /// When the request was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Cheap, cloneable handle for requesting passes without blocking
#[derive(Debug, Clone)]
pub struct UploadHandle {
    tx: mpsc::Sender<UploadRequest>,
}

impl UploadHandle {
    /// Request a pass. Returns false when the request could not be queued;
    /// a full queue already holds a pending pass that will cover this one.
    pub fn request(&self, reason: UploadReason) -> bool {
        match self.tx.try_send(UploadRequest { reason, enqueued_at: Instant::now() }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(reason = %reason.as_str(), "upload_request_coalesced");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(reason = %reason.as_str(), "upload_worker_gone");
                false
            }
        }
    }
}

/// Worker that owns the reconciler and serializes passes
pub struct UploadWorker {
    reconciler: UploadReconciler,
    owner: Option<String>,
    request_rx: mpsc::Receiver<UploadRequest>,
    /// Periodic pass interval; `None` disables the timer
    interval: Option<Duration>,
    metrics: Arc<Metrics>,
    last_report: watch::Sender<Option<ReconcileReport>>,
}

impl UploadWorker {
    /// Latest pass outcome, for status reporting
    pub fn subscribe(&self) -> watch::Receiver<Option<ReconcileReport>> {
        self.last_report.subscribe()
    }

    /// Run passes until shutdown or until every handle is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            owner = ?self.owner,
            interval_secs = ?self.interval.map(|d| d.as_secs()),
            "upload_worker_started"
        );

        // Without a timer the tick branch never fires
        let mut ticker = tokio::time::interval(self.interval.unwrap_or(Duration::from_secs(3600)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let periodic = self.interval.is_some();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                request = self.request_rx.recv() => {
                    match request {
                        Some(req) => {
                            let queue_delay_us = req.enqueued_at.elapsed().as_micros() as u64;
                            debug!(
                                reason = %req.reason.as_str(),
                                queue_delay_us = %queue_delay_us,
                                "upload_request_received"
                            );
                            self.run_pass(req.reason).await;
                        }
                        None => break,
                    }
                }
                _ = ticker.tick(), if periodic => {
                    self.run_pass(UploadReason::Periodic).await;
                }
            }
        }

        info!("upload_worker_stopped");
    }

    /// One reconciliation pass, outcome logged and recorded
    pub async fn run_pass(&self, reason: UploadReason) -> Option<ReconcileReport> {
        match self.reconciler.reconcile(self.owner.as_deref()).await {
            Ok(report) => {
                if report.attempted {
                    self.metrics.record_reconcile(report.uploaded.len(), report.failed.len());
                }
                for failure in &report.failed {
                    warn!(
                        reason = %reason.as_str(),
                        archive = %failure.file_name,
                        error = %failure.error,
                        "upload_pending_retry"
                    );
                }
                self.last_report.send_replace(Some(report.clone()));
                Some(report)
            }
            Err(e) => {
                self.metrics.record_reconcile_aborted();
                error!(reason = %reason.as_str(), error = %format!("{e:#}"), "reconcile_aborted");
                None
            }
        }
    }
}

/// Create the request handle and the worker (to be spawned)
pub fn create_upload_worker(
    reconciler: UploadReconciler,
    owner: Option<String>,
    interval: Option<Duration>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (UploadHandle, UploadWorker) {
    let (tx, request_rx) = mpsc::channel(buffer_size.max(1));
    let (last_report, _) = watch::channel(None);
    let worker = UploadWorker { reconciler, owner, request_rx, interval, metrics, last_report };
    (UploadHandle { tx }, worker)
}
