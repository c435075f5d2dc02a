//! Motion scenarios and the sensor accuracy each one calls for

use serde::Serialize;

/// Coarse motion/travel state driving the sampling accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    ActivelyMoving,
    Stopped,
    NotMoving,
    InFastVehicle,
}

impl Scenario {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::ActivelyMoving => "actively_moving",
            Scenario::Stopped => "stopped",
            Scenario::NotMoving => "not_moving",
            Scenario::InFastVehicle => "in_fast_vehicle",
        }
    }

    /// Label shown to the user
    pub fn label(&self) -> &'static str {
        match self {
            Scenario::ActivelyMoving => "Actively moving",
            Scenario::Stopped => "Stopped",
            Scenario::NotMoving => "Not moving",
            Scenario::InFastVehicle => "In a fast vehicle",
        }
    }

    /// Fixed scenario to accuracy mapping
    pub fn directive(&self) -> AccuracyDirective {
        match self {
            // GPS
            Scenario::ActivelyMoving => AccuracyDirective::NearestTenMetres,
            // Cell/WiFi in urban areas, low-power GPS otherwise
            Scenario::Stopped => AccuracyDirective::HundredMetres,
            Scenario::NotMoving => AccuracyDirective::ThreeKilometres,
            Scenario::InFastVehicle => AccuracyDirective::Kilometre,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positioning accuracy/power level requested from the sensor collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyDirective {
    NearestTenMetres,
    HundredMetres,
    Kilometre,
    ThreeKilometres,
}

impl AccuracyDirective {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyDirective::NearestTenMetres => "nearest_ten_metres",
            AccuracyDirective::HundredMetres => "hundred_metres",
            AccuracyDirective::Kilometre => "kilometre",
            AccuracyDirective::ThreeKilometres => "three_kilometres",
        }
    }

    /// Nominal accuracy radius in metres
    pub fn nominal_metres(&self) -> u32 {
        match self {
            AccuracyDirective::NearestTenMetres => 10,
            AccuracyDirective::HundredMetres => 100,
            AccuracyDirective::Kilometre => 1_000,
            AccuracyDirective::ThreeKilometres => 3_000,
        }
    }
}

impl std::fmt::Display for AccuracyDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
