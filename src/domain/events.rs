//! Messages crossing the recorder boundary
//!
//! - `SensorEvent` - inbound readings and commands, serialized onto the recorder
//! - `SensorControl` - the only thing the sensor collaborator is told
//! - `RecorderStatus` - snapshot for the UI and the status endpoint
//! - `RecorderNotice` - user-facing, non-fatal problems

use crate::domain::samples::{AuthorizationStatus, LocationSample, MotionSample};
use crate::domain::scenario::{AccuracyDirective, Scenario};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum SensorEventKind {
    Location(LocationSample),
    Motion(MotionSample),
    Authorization(AuthorizationStatus),
    StartTrip,
    StopTrip,
}

impl SensorEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorEventKind::Location(_) => "location",
            SensorEventKind::Motion(_) => "motion",
            SensorEventKind::Authorization(_) => "authorization",
            SensorEventKind::StartTrip => "start_trip",
            SensorEventKind::StopTrip => "stop_trip",
        }
    }
}

/// An inbound event with its arrival time
#[derive(Debug, Clone)]
pub struct SensorEvent {
    pub kind: SensorEventKind,
    pub received_at: Instant,
}

impl SensorEvent {
    pub fn new(kind: SensorEventKind) -> Self {
        Self { kind, received_at: Instant::now() }
    }

    pub fn location(sample: LocationSample) -> Self {
        Self::new(SensorEventKind::Location(sample))
    }

    pub fn motion(sample: MotionSample) -> Self {
        Self::new(SensorEventKind::Motion(sample))
    }

    pub fn authorization(status: AuthorizationStatus) -> Self {
        Self::new(SensorEventKind::Authorization(status))
    }
}

/// Sensor configuration requested by the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorControl {
    pub accuracy: AccuracyDirective,
    pub updates_enabled: bool,
}

impl Default for SensorControl {
    fn default() -> Self {
        Self { accuracy: Scenario::default().directive(), updates_enabled: true }
    }
}

/// Point-in-time view of the recorder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecorderStatus {
    pub scenario: Scenario,
    pub scenario_label: &'static str,
    pub directive: AccuracyDirective,
    pub updates_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationStatus>,
    pub trip_open: bool,
    pub owner: String,
    pub locations: usize,
    pub motions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fix_at: Option<DateTime<Utc>>,
}

impl Default for RecorderStatus {
    fn default() -> Self {
        let scenario = Scenario::default();
        Self {
            scenario,
            scenario_label: scenario.label(),
            directive: scenario.directive(),
            updates_enabled: true,
            authorization: None,
            trip_open: false,
            owner: crate::domain::archive::ANONYMOUS_OWNER.to_string(),
            locations: 0,
            motions: 0,
            last_fix_at: None,
        }
    }
}

/// Problems the user should hear about; none of them stop recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecorderNotice {
    /// Location permission withdrawn; updates halted, recorded data kept
    AuthorizationRevoked { status: AuthorizationStatus },
    /// A checkpoint or archive write failed
    PersistenceFailed { operation: &'static str, error: String },
}

impl RecorderNotice {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderNotice::AuthorizationRevoked { .. } => "authorization_revoked",
            RecorderNotice::PersistenceFailed { .. } => "persistence_failed",
        }
    }

    /// Text suitable for an alert
    pub fn message(&self) -> String {
        match self {
            RecorderNotice::AuthorizationRevoked { status } => format!(
                "Location access is {}. Trip recording is paused until it is granted again.",
                status.as_str().replace('_', " ")
            ),
            RecorderNotice::PersistenceFailed { operation, error } => {
                format!("Could not save trip data ({operation}): {error}")
            }
        }
    }
}
