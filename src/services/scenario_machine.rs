//! Scenario state machine
//!
//! Holds the current `Scenario` plus classifier memory and turns each sample
//! into an accuracy directive. Never touches the sensor itself; callers
//! forward the returned directive.

use crate::domain::samples::{LocationSample, MotionSample};
use crate::domain::scenario::{AccuracyDirective, Scenario};
use crate::infra::clock::Clock;
use crate::services::classifier::{self, ClassifierState, Thresholds};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of feeding one accepted location sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioUpdate {
    pub scenario: Scenario,
    pub directive: AccuracyDirective,
    /// Scenario before this sample, when it changed
    pub previous: Option<Scenario>,
}

impl ScenarioUpdate {
    #[inline]
    pub fn transitioned(&self) -> bool {
        self.previous.is_some()
    }
}

pub struct ScenarioStateMachine {
    scenario: Scenario,
    state: ClassifierState,
    thresholds: Thresholds,
    clock: Arc<dyn Clock>,
}

impl ScenarioStateMachine {
    pub fn new(thresholds: Thresholds, clock: Arc<dyn Clock>) -> Self {
        Self { scenario: Scenario::default(), state: ClassifierState::new(), thresholds, clock }
    }

    #[inline]
    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    #[inline]
    pub fn directive(&self) -> AccuracyDirective {
        self.scenario.directive()
    }

    pub fn state(&self) -> &ClassifierState {
        &self.state
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Whether `sample` is too old to act on right now
    pub fn is_stale(&self, sample: &LocationSample) -> bool {
        sample.is_stale(self.clock.now(), self.thresholds.stale_after)
    }

    /// Record a motion reading. Returns false when it carried no usable
    /// evidence (low confidence or unknown kind).
    pub fn on_motion(&mut self, sample: &MotionSample) -> bool {
        if !sample.is_reliable() {
            debug!(
                kind = %sample.kind.as_str(),
                confidence = ?sample.confidence,
                "motion_ignored"
            );
            return false;
        }
        self.state.record_motion(sample);
        true
    }

    /// Feed one location fix. Returns `None` for stale fixes, which leave the
    /// classifier untouched.
    pub fn on_location(&mut self, sample: &LocationSample) -> Option<ScenarioUpdate> {
        let now = self.clock.now();
        if sample.is_stale(now, self.thresholds.stale_after) {
            debug!(
                age_secs = %sample.age(now).num_seconds(),
                "location_stale"
            );
            return None;
        }

        if self.scenario == Scenario::ActivelyMoving {
            self.state.record_active_location(
                sample.clone(),
                now,
                self.thresholds.same_location_window,
            );
        }

        let next = self.evaluate(sample, now);
        let previous = if next != self.scenario {
            let previous = self.scenario;
            self.enter(next, sample);
            info!(
                from = %previous,
                to = %next,
                directive = %next.directive(),
                "scenario_changed"
            );
            Some(previous)
        } else {
            None
        };

        Some(ScenarioUpdate { scenario: self.scenario, directive: self.directive(), previous })
    }

    /// Target scenario for the current one given this sample
    fn evaluate(&self, sample: &LocationSample, now: DateTime<Utc>) -> Scenario {
        let t = &self.thresholds;
        let state = &self.state;
        match self.scenario {
            Scenario::ActivelyMoving => {
                let mut next = Scenario::ActivelyMoving;
                if classifier::is_stationary(state, t, now) {
                    next = Scenario::NotMoving;
                }
                if classifier::is_not_travelling(state, t, now) {
                    next = Scenario::Stopped;
                }
                // Fast-vehicle detection wins over idle detection
                if classifier::is_in_fast_vehicle(state, sample, t, now) {
                    next = Scenario::InFastVehicle;
                }
                next
            }
            Scenario::Stopped => {
                if classifier::is_travelling(state, sample, t) {
                    Scenario::ActivelyMoving
                } else if classifier::is_stationary(state, t, now) {
                    Scenario::NotMoving
                } else {
                    Scenario::Stopped
                }
            }
            Scenario::NotMoving => {
                if classifier::is_moving(state, t, now) {
                    Scenario::Stopped
                } else {
                    Scenario::NotMoving
                }
            }
            Scenario::InFastVehicle => {
                if classifier::is_moving(state, t, now) {
                    Scenario::ActivelyMoving
                } else {
                    Scenario::InFastVehicle
                }
            }
        }
    }

    fn enter(&mut self, next: Scenario, sample: &LocationSample) {
        if next == Scenario::ActivelyMoving {
            self.state.restart_active_window(sample.clone());
        }
        self.scenario = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::samples::{metres_to_latitude_degrees, Confidence, MotionKind};
    use crate::infra::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    const LAT: f64 = 43.4723;
    const LON: f64 = -80.5449;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 10, 27, 8, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn fix(secs: i64, north_m: f64) -> LocationSample {
        LocationSample::new(LAT + metres_to_latitude_degrees(north_m), LON, at(secs))
    }

    fn machine() -> (ScenarioStateMachine, ManualClock) {
        let clock = ManualClock::new(t0());
        let sm = ScenarioStateMachine::new(Thresholds::default(), Arc::new(clock.clone()));
        (sm, clock)
    }

    /// Feed one fix taken "now" at `secs`
    fn feed(
        sm: &mut ScenarioStateMachine,
        clock: &ManualClock,
        secs: i64,
        north_m: f64,
    ) -> ScenarioUpdate {
        clock.set(at(secs));
        sm.on_location(&fix(secs, north_m)).expect("fresh fix accepted")
    }

    /// Drive a machine into Stopped by idling on the same spot for 900s
    fn stopped_machine() -> (ScenarioStateMachine, ManualClock) {
        let (mut sm, clock) = machine();
        for s in (0..=900).step_by(5) {
            feed(&mut sm, &clock, s, 0.0);
        }
        assert_eq!(sm.scenario(), Scenario::Stopped);
        (sm, clock)
    }

    #[test]
    fn test_initial_state() {
        let (sm, _) = machine();
        assert_eq!(sm.scenario(), Scenario::ActivelyMoving);
        assert_eq!(sm.directive(), AccuracyDirective::NearestTenMetres);
    }

    #[test]
    fn test_stale_location_is_noop() {
        let (mut sm, clock) = machine();
        clock.set(at(120));

        assert!(sm.on_location(&fix(59, 0.0)).is_none());
        assert!(sm.state().last_active_location().is_none());
        assert_eq!(sm.state().window_len(), 0);

        // Exactly 60s old is still fresh
        assert!(sm.on_location(&fix(60, 0.0)).is_some());
        assert!(sm.state().last_active_location().is_some());
    }

    #[test]
    fn test_low_confidence_motion_ignored() {
        let (mut sm, _) = machine();
        let medium = MotionSample::new(MotionKind::Stationary, Confidence::Medium, t0());
        let unknown = MotionSample::new(MotionKind::Unknown, Confidence::High, t0());

        assert!(!sm.on_motion(&medium));
        assert!(!sm.on_motion(&unknown));
        assert!(sm.state().last_stationary().is_none());
    }

    fn stationary_for(duration_secs: i64) -> Scenario {
        let (mut sm, clock) = machine();
        let mut s = 0;
        while s <= duration_secs {
            clock.set(at(s));
            sm.on_motion(&MotionSample::new(MotionKind::Stationary, Confidence::High, at(s)));
            feed(&mut sm, &clock, s, 0.0);
            s += 30;
        }
        sm.scenario()
    }

    #[test]
    fn test_stationary_for_ten_minutes_goes_not_moving() {
        assert_eq!(stationary_for(600), Scenario::NotMoving);
    }

    #[test]
    fn test_stationary_under_ten_minutes_stays() {
        assert_eq!(stationary_for(570), Scenario::ActivelyMoving);
    }

    #[test]
    fn test_one_stationary_reading_with_irregular_fixes() {
        let (mut sm, clock) = machine();
        sm.on_motion(&MotionSample::new(MotionKind::Stationary, Confidence::High, t0()));

        let mut entered = None;
        for s in (0..=880).step_by(7) {
            let update = feed(&mut sm, &clock, s, 0.0);
            if update.transitioned() && entered.is_none() {
                entered = Some((s, update.scenario));
            }
        }
        assert_eq!(entered, Some((602, Scenario::NotMoving)));
        assert_eq!(sm.directive(), AccuracyDirective::ThreeKilometres);
    }

    #[test]
    fn test_idle_sixteen_minutes_goes_stopped() {
        let (mut sm, clock) = machine();
        let mut last = None;
        for s in (0..=960).step_by(5) {
            let update = feed(&mut sm, &clock, s, 0.0);
            if s < 900 {
                assert_eq!(update.scenario, Scenario::ActivelyMoving, "at {s}s");
            }
            last = Some(update);
        }
        let last = last.unwrap();
        assert_eq!(last.scenario, Scenario::Stopped);
        assert_eq!(last.directive, AccuracyDirective::HundredMetres);
    }

    #[test]
    fn test_transition_reported_once() {
        let (mut sm, clock) = machine();
        let mut transitions = 0;
        for s in (0..=960).step_by(5) {
            if feed(&mut sm, &clock, s, 0.0).transitioned() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
    }

    #[test]
    fn test_insufficient_coverage_keeps_scenario_regardless_of_position() {
        let (mut sm, clock) = machine();
        for s in (0..890).step_by(5) {
            let north = if s % 10 == 0 { 0.0 } else { 1000.0 };
            assert_eq!(feed(&mut sm, &clock, s, north).scenario, Scenario::ActivelyMoving);
        }
    }

    #[test]
    fn test_stopped_resumes_at_250m_not_249m() {
        let (mut sm, clock) = stopped_machine();

        let update = feed(&mut sm, &clock, 905, 249.0);
        assert_eq!(update.scenario, Scenario::Stopped);
        assert!(!update.transitioned());

        let update = feed(&mut sm, &clock, 910, 250.0);
        assert_eq!(update.scenario, Scenario::ActivelyMoving);
        assert_eq!(update.previous, Some(Scenario::Stopped));
        assert_eq!(update.directive, AccuracyDirective::NearestTenMetres);
    }

    #[test]
    fn test_reentering_actively_moving_resets_window() {
        let (mut sm, clock) = stopped_machine();
        feed(&mut sm, &clock, 910, 300.0);
        assert_eq!(sm.scenario(), Scenario::ActivelyMoving);
        assert_eq!(sm.state().window_len(), 0);

        // A fresh idle period is needed before stopping again
        feed(&mut sm, &clock, 915, 300.0);
        assert_eq!(sm.scenario(), Scenario::ActivelyMoving);
    }

    #[test]
    fn test_fast_vehicle_overrides_idle() {
        let (mut sm, clock) = machine();
        for s in (0..900).step_by(5) {
            feed(&mut sm, &clock, s, 0.0);
        }
        clock.set(at(899));
        sm.on_motion(&MotionSample::new(MotionKind::Automotive, Confidence::High, at(899)));

        clock.set(at(900));
        let fast = fix(900, 0.0).with_speed(30.0, Some(1.0));
        let update = sm.on_location(&fast).unwrap();
        assert_eq!(update.scenario, Scenario::InFastVehicle);
        assert_eq!(update.directive, AccuracyDirective::Kilometre);
    }

    #[test]
    fn test_fast_vehicle_back_to_actively_moving() {
        let (mut sm, clock) = machine();
        clock.set(at(0));
        sm.on_motion(&MotionSample::new(MotionKind::Automotive, Confidence::High, at(0)));
        let update = sm.on_location(&fix(0, 0.0).with_speed(30.0, Some(1.0))).unwrap();
        assert_eq!(update.scenario, Scenario::InFastVehicle);

        // Still in vehicle signal range
        clock.set(at(10));
        sm.on_motion(&MotionSample::new(MotionKind::Walking, Confidence::High, at(10)));
        assert_eq!(feed(&mut sm, &clock, 10, 0.0).scenario, Scenario::InFastVehicle);

        clock.set(at(40));
        sm.on_motion(&MotionSample::new(MotionKind::Walking, Confidence::High, at(40)));
        let update = feed(&mut sm, &clock, 40, 0.0);
        assert_eq!(update.scenario, Scenario::ActivelyMoving);
        assert_eq!(sm.state().last_active_location().map(|l| l.timestamp), Some(at(40)));
    }

    #[test]
    fn test_not_moving_to_stopped_on_activity() {
        let (mut sm, clock) = machine();
        let mut s = 0;
        while s <= 600 {
            clock.set(at(s));
            sm.on_motion(&MotionSample::new(MotionKind::Stationary, Confidence::High, at(s)));
            feed(&mut sm, &clock, s, 0.0);
            s += 30;
        }
        assert_eq!(sm.scenario(), Scenario::NotMoving);

        // Walking while the last stationary signal is still inside 20s
        clock.set(at(610));
        sm.on_motion(&MotionSample::new(MotionKind::Walking, Confidence::High, at(610)));
        assert_eq!(feed(&mut sm, &clock, 610, 0.0).scenario, Scenario::NotMoving);

        clock.set(at(625));
        sm.on_motion(&MotionSample::new(MotionKind::Walking, Confidence::High, at(625)));
        let update = feed(&mut sm, &clock, 625, 0.0);
        assert_eq!(update.scenario, Scenario::Stopped);
        assert_eq!(update.directive, AccuracyDirective::HundredMetres);
    }

    #[test]
    fn test_stopped_to_not_moving() {
        let (mut sm, clock) = stopped_machine();
        let mut s = 905;
        while s <= 1505 {
            clock.set(at(s));
            sm.on_motion(&MotionSample::new(MotionKind::Stationary, Confidence::High, at(s)));
            feed(&mut sm, &clock, s, 0.0);
            s += 30;
        }
        assert_eq!(sm.scenario(), Scenario::NotMoving);
        assert_eq!(sm.directive(), AccuracyDirective::ThreeKilometres);
    }
}
