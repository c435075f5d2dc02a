//! Hysteresis predicates deciding when the motion scenario may change
//!
//! Each predicate guards one directed edge of the scenario graph and only
//! reads `ClassifierState`; the state machine owns all mutation. Missing
//! history always means "no transition".

use crate::domain::samples::{LocationSample, MotionClass, MotionSample};
use crate::infra::config::ClassifierConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Fraction of the fast-vehicle speed a reported speed error may reach
const SPEED_ACCURACY_FRACTION: f64 = 0.25;

/// Classifier thresholds resolved into durations and SI units
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Fixes older than this at arrival are ignored
    pub stale_after: Duration,
    /// `is_stationary` window
    pub stationary_window: Duration,
    /// `is_not_travelling` lookback, also the rolling history bound
    pub same_location_window: Duration,
    pub same_location_distance_m: f64,
    pub fast_speed_mps: f64,
    /// `is_in_fast_vehicle` motion-signal window
    pub vehicle_or_stationary_window: Duration,
    /// `is_moving` window
    pub actively_moving_window: Duration,
    pub travelling_distance_m: f64,
}

impl Thresholds {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            stale_after: secs(config.stale_sample_secs),
            stationary_window: secs(config.stopped_moving_stationary_secs),
            same_location_window: secs(config.stop_moving_same_location_secs),
            same_location_distance_m: config.same_location_distance_m,
            fast_speed_mps: config.fast_speed_kmh / 3.6,
            vehicle_or_stationary_window: secs(config.in_vehicle_or_stationary_secs),
            actively_moving_window: secs(config.actively_moving_secs),
            travelling_distance_m: config.started_travelling_distance_m,
        }
    }

    /// Largest speed error (m/s) that still trusts a fast reading
    #[inline]
    pub fn max_speed_accuracy_mps(&self) -> f64 {
        self.fast_speed_mps * SPEED_ACCURACY_FRACTION
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}

fn secs(s: u64) -> Duration {
    // Clamp absurd configured values instead of overflowing
    Duration::seconds(s.min(u32::MAX as u64) as i64)
}

/// Rolling memory the predicates consult
#[derive(Debug, Clone, Default)]
pub struct ClassifierState {
    last_active: Option<DateTime<Utc>>,
    last_stationary: Option<DateTime<Utc>>,
    last_in_vehicle: Option<DateTime<Utc>>,
    /// Start of the current uninterrupted run of stationary signals
    stationary_run_started: Option<DateTime<Utc>>,
    /// Most recent fix taken while actively moving
    last_active_location: Option<LocationSample>,
    /// Earlier actively-moving fixes, oldest first
    window: VecDeque<LocationSample>,
}

impl ClassifierState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reliable motion signal. Active or in-vehicle signals break
    /// the stationary run.
    pub fn record_motion(&mut self, sample: &MotionSample) {
        let Some(class) = sample.kind.class() else {
            return;
        };
        let at = sample.started_at;
        match class {
            MotionClass::Active => {
                bump(&mut self.last_active, at);
                self.stationary_run_started = None;
            }
            MotionClass::InVehicle => {
                bump(&mut self.last_in_vehicle, at);
                self.stationary_run_started = None;
            }
            MotionClass::Stationary => {
                bump(&mut self.last_stationary, at);
                if self.stationary_run_started.is_none() {
                    self.stationary_run_started = Some(at);
                }
            }
        }
    }

    /// Push the previous actively-moving fix into the window and make `sample`
    /// the new last fix, then evict by age.
    pub fn record_active_location(
        &mut self,
        sample: LocationSample,
        now: DateTime<Utc>,
        lookback: Duration,
    ) {
        if let Some(previous) = self.last_active_location.replace(sample) {
            self.window.push_back(previous);
        }
        self.evict(now, lookback);
    }

    /// Forget the window and start a fresh one anchored at `sample`
    pub fn restart_active_window(&mut self, sample: LocationSample) {
        self.window.clear();
        self.last_active_location = Some(sample);
    }

    /// Drop entries older than `lookback`, keeping the youngest of them as a
    /// boundary so coverage of the full window stays observable.
    fn evict(&mut self, now: DateTime<Utc>, lookback: Duration) {
        while self.window.len() >= 2 && self.window[1].age(now) >= lookback {
            self.window.pop_front();
        }
    }

    pub fn last_active_location(&self) -> Option<&LocationSample> {
        self.last_active_location.as_ref()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        self.last_active
    }

    pub fn last_stationary(&self) -> Option<DateTime<Utc>> {
        self.last_stationary
    }

    pub fn last_in_vehicle(&self) -> Option<DateTime<Utc>> {
        self.last_in_vehicle
    }
}

fn bump(slot: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) {
    match slot {
        Some(prev) if *prev >= at => {}
        _ => *slot = Some(at),
    }
}

/// Signal seen no longer than `window` ago
#[inline]
fn within(signal: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    signal.is_some_and(|at| now.signed_duration_since(at) <= window)
}

/// ActivelyMoving/Stopped -> NotMoving
pub fn is_stationary(state: &ClassifierState, thresholds: &Thresholds, now: DateTime<Utc>) -> bool {
    let window = thresholds.stationary_window;
    // An unbroken run is still in progress, however long ago its last reading
    let Some(start) = state.stationary_run_started else {
        return false;
    };
    if within(state.last_active, now, window) || within(state.last_in_vehicle, now, window) {
        return false;
    }
    now.signed_duration_since(start) >= window
}

/// ActivelyMoving -> Stopped
pub fn is_not_travelling(
    state: &ClassifierState,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> bool {
    let lookback = thresholds.same_location_window;
    let Some(anchor) = state.last_active_location.as_ref() else {
        return false;
    };
    // Not enough history to cover the lookback yet
    match state.window.front() {
        Some(oldest) if oldest.age(now) >= lookback => {}
        _ => return false,
    }
    state
        .window
        .iter()
        .filter(|s| s.age(now) <= lookback)
        .all(|s| s.distance_to(anchor) <= thresholds.same_location_distance_m)
}

/// ActivelyMoving -> InFastVehicle
pub fn is_in_fast_vehicle(
    state: &ClassifierState,
    sample: &LocationSample,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> bool {
    if sample.speed < thresholds.fast_speed_mps {
        return false;
    }
    let trusted = sample
        .speed_accuracy
        .is_some_and(|acc| acc >= 0.0 && acc <= thresholds.max_speed_accuracy_mps());
    if !trusted {
        return false;
    }
    let window = thresholds.vehicle_or_stationary_window;
    within(state.last_in_vehicle, now, window) || within(state.last_stationary, now, window)
}

/// NotMoving -> Stopped, InFastVehicle -> ActivelyMoving
pub fn is_moving(state: &ClassifierState, thresholds: &Thresholds, now: DateTime<Utc>) -> bool {
    let window = thresholds.actively_moving_window;
    within(state.last_active, now, window)
        && !within(state.last_stationary, now, window)
        && !within(state.last_in_vehicle, now, window)
}

/// Stopped -> ActivelyMoving
pub fn is_travelling(
    state: &ClassifierState,
    sample: &LocationSample,
    thresholds: &Thresholds,
) -> bool {
    state
        .last_active_location
        .as_ref()
        .is_some_and(|last| sample.distance_to(last) >= thresholds.travelling_distance_m)
}
