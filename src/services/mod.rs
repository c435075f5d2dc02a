//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `classifier` - Motion predicates over the rolling history
//! - `scenario_machine` - Scenario hysteresis and accuracy directives
//! - `trip_session` - Trip lifecycle with durable checkpoints
//! - `reconciler` - Upload of archives the remote store lacks
//! - `upload_worker` - Async reconciliation worker
//! - `recorder` - Central event processor tying the above together

pub mod classifier;
pub mod reconciler;
pub mod recorder;
pub mod scenario_machine;
pub mod trip_session;
pub mod upload_worker;

// Re-export commonly used types
pub use classifier::Thresholds;
pub use reconciler::{ReconcileReport, UploadReconciler};
pub use recorder::Recorder;
pub use scenario_machine::{ScenarioStateMachine, ScenarioUpdate};
pub use trip_session::TripSession;
pub use upload_worker::{create_upload_worker, UploadHandle, UploadReason, UploadWorker};
