//! Domain models - sensor samples, scenarios and the trip archive format
//!
//! This module contains the canonical data types used throughout the system:
//! - `LocationSample` / `MotionSample` - readings from the sensor collaborator
//! - `Scenario` - coarse motion state, and the `AccuracyDirective` it maps to
//! - `TripArchive` - a finalized trip and its on-disk record format
//! - `SensorEvent` / `RecorderNotice` - messages in and out of the recorder

pub mod archive;
pub mod events;
pub mod samples;
pub mod scenario;

// Re-export commonly used types at module level
pub use archive::{is_valid_owner, ArchiveKind, ArchiveName, TripArchive, ANONYMOUS_OWNER};
pub use events::{RecorderNotice, RecorderStatus, SensorControl, SensorEvent, SensorEventKind};
pub use samples::{
    AuthorizationStatus, Confidence, LocationSample, MotionClass, MotionKind, MotionSample,
};
pub use scenario::{AccuracyDirective, Scenario};
