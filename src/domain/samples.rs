//! Sensor sample types consumed by the classifier and the trip session

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single location fix from the positioning sensor
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Course over ground in degrees
    pub heading: f64,
    /// Ground speed in m/s
    pub speed: f64,
    /// Horizontal accuracy radius in metres
    pub accuracy: f64,
    /// Speed accuracy in m/s, when the sensor reports one
    pub speed_accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            heading: 0.0,
            speed: 0.0,
            accuracy: 0.0,
            speed_accuracy: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed: f64, speed_accuracy: Option<f64>) -> Self {
        self.speed = speed;
        self.speed_accuracy = speed_accuracy;
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Age of the fix relative to `now` (negative for fixes from the future)
    #[inline]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.timestamp)
    }

    /// Cached fixes are delivered with an old timestamp; anything older than
    /// `max_age` at arrival is not a live reading.
    #[inline]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    /// Great-circle distance in metres, rounded to the millimetre so that
    /// threshold comparisons are stable against floating point noise.
    pub fn distance_to(&self, other: &LocationSample) -> f64 {
        let d = haversine_m(self.latitude, self.longitude, other.latitude, other.longitude);
        (d * 1000.0).round() / 1000.0
    }
}

fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Latitude offset in degrees that moves a point `metres` due north
pub fn metres_to_latitude_degrees(metres: f64) -> f64 {
    (metres / EARTH_RADIUS_M).to_degrees()
}

/// Activity reported by the motion coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    Walking,
    Running,
    Cycling,
    Automotive,
    Stationary,
    Unknown,
}

/// Coarse grouping of motion kinds used by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionClass {
    Active,
    InVehicle,
    Stationary,
}

impl MotionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionKind::Walking => "walking",
            MotionKind::Running => "running",
            MotionKind::Cycling => "cycling",
            MotionKind::Automotive => "automotive",
            MotionKind::Stationary => "stationary",
            MotionKind::Unknown => "unknown",
        }
    }

    /// Class used for hysteresis bookkeeping, `None` for unknown
    pub fn class(&self) -> Option<MotionClass> {
        match self {
            MotionKind::Walking | MotionKind::Running | MotionKind::Cycling => {
                Some(MotionClass::Active)
            }
            MotionKind::Automotive => Some(MotionClass::InVehicle),
            MotionKind::Stationary => Some(MotionClass::Stationary),
            MotionKind::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A motion-activity reading with its confidence
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    pub kind: MotionKind,
    pub confidence: Confidence,
    pub started_at: DateTime<Utc>,
}

impl MotionSample {
    pub fn new(kind: MotionKind, confidence: Confidence, started_at: DateTime<Utc>) -> Self {
        Self { kind, confidence, started_at }
    }

    /// Only confident, classified readings count as evidence
    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.confidence == Confidence::High && self.kind != MotionKind::Unknown
    }
}

/// Location permission state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    GrantedAlways,
    GrantedWhenInUse,
    Denied,
    Restricted,
    Undetermined,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::GrantedAlways => "granted_always",
            AuthorizationStatus::GrantedWhenInUse => "granted_when_in_use",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::Restricted => "restricted",
            AuthorizationStatus::Undetermined => "undetermined",
        }
    }

    #[inline]
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthorizationStatus::GrantedAlways | AuthorizationStatus::GrantedWhenInUse)
    }

    #[inline]
    pub fn is_refused(&self) -> bool {
        matches!(self, AuthorizationStatus::Denied | AuthorizationStatus::Restricted)
    }
}
