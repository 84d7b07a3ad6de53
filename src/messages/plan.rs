//! Plan payload types: specifications, maneuvers, transitions, mementos.
//!
//! A plan is an ordered graph of maneuvers with a designated start and
//! conditional transitions. These types travel on the bus (inside
//! `PlanControl` / `PlanDB` messages) and are persisted verbatim in the
//! plan database, so everything here derives serde.

use serde::{Deserialize, Serialize};

// ============================================================================
// Speed
// ============================================================================

/// Units of the commanded speed of a maneuver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SpeedUnits {
    /// Speed over ground in meters per second.
    #[default]
    MetersPerSecond,
    /// Raw motor setpoint. Travel time cannot be derived from it.
    Rpm,
    /// Fraction of the vehicle's maximum actuation.
    Percent,
}

impl std::fmt::Display for SpeedUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeedUnits::MetersPerSecond => write!(f, "m/s"),
            SpeedUnits::Rpm => write!(f, "rpm"),
            SpeedUnits::Percent => write!(f, "%"),
        }
    }
}

// ============================================================================
// Maneuvers
// ============================================================================

/// An atomic vehicle action with typed parameters.
///
/// Latitude/longitude are WGS-84 radians, `z` is depth in meters (positive
/// down), durations are seconds where `0` means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Maneuver {
    /// Transit to a waypoint at a commanded speed.
    Goto {
        lat: f64,
        lon: f64,
        z: f64,
        speed: f64,
        speed_units: SpeedUnits,
    },
    /// Orbit a point at a given radius for a given duration.
    Loiter {
        lat: f64,
        lon: f64,
        radius: f64,
        duration: f64,
        speed: f64,
        speed_units: SpeedUnits,
    },
    /// Hold position near a target point within a radius.
    StationKeeping {
        lat: f64,
        lon: f64,
        radius: f64,
        duration: f64,
        speed: f64,
        speed_units: SpeedUnits,
    },
    /// Do nothing for a given duration (zero = until told otherwise).
    Idle { duration: f64 },
}

impl Maneuver {
    /// Maneuver kind name, as registered by the vehicle via `RegisterManeuver`.
    pub fn kind(&self) -> &'static str {
        match self {
            Maneuver::Goto { .. } => "Goto",
            Maneuver::Loiter { .. } => "Loiter",
            Maneuver::StationKeeping { .. } => "StationKeeping",
            Maneuver::Idle { .. } => "Idle",
        }
    }

    /// Target position of the maneuver, if it has one.
    pub fn position(&self) -> Option<(f64, f64)> {
        match *self {
            Maneuver::Goto { lat, lon, .. }
            | Maneuver::Loiter { lat, lon, .. }
            | Maneuver::StationKeeping { lat, lon, .. } => Some((lat, lon)),
            Maneuver::Idle { .. } => None,
        }
    }

    /// Commanded speed in m/s. `None` when the speed is expressed in units
    /// that do not translate to ground speed (RPM, percent).
    pub fn speed_mps(&self) -> Option<f64> {
        match *self {
            Maneuver::Goto {
                speed, speed_units, ..
            }
            | Maneuver::Loiter {
                speed, speed_units, ..
            }
            | Maneuver::StationKeeping {
                speed, speed_units, ..
            } => (speed_units == SpeedUnits::MetersPerSecond && speed > 0.0).then_some(speed),
            Maneuver::Idle { .. } => None,
        }
    }

    /// Explicit timed duration in seconds. `None` when the maneuver has no
    /// duration parameter or the duration is unbounded (zero).
    pub fn timed_duration(&self) -> Option<f64> {
        match *self {
            Maneuver::Loiter { duration, .. }
            | Maneuver::StationKeeping { duration, .. }
            | Maneuver::Idle { duration } => (duration > 0.0).then_some(duration),
            Maneuver::Goto { .. } => None,
        }
    }
}

// ============================================================================
// Plan graph
// ============================================================================

/// A named maneuver inside a plan, with an optional resume token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanManeuver {
    /// Identifier unique within the plan.
    pub maneuver_id: String,
    /// The typed maneuver payload.
    pub data: Maneuver,
    /// Opaque resume state for this maneuver kind, injected when the plan
    /// is started from a memento.
    #[serde(default)]
    pub memento: Option<String>,
}

/// A directed transition between two maneuvers of a plan.
///
/// `guard` is an empty string for an unconditional transition; the only
/// other recognized guard is `"done"` (follow when the source maneuver
/// finishes), kept for compatibility with operator consoles that always
/// write it out. Unknown guards are rejected at parse time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanTransition {
    pub source_man: String,
    pub dest_man: String,
    #[serde(default)]
    pub guard: String,
}

/// A mission plan: an ordered collection of maneuvers, a designated start
/// maneuver, and directed transitions between them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanSpecification {
    /// Identifier of the plan, unique on the vehicle.
    pub plan_id: String,
    /// Free-form operator description.
    #[serde(default)]
    pub description: String,
    /// Identifier of the maneuver execution starts at.
    pub start_man_id: String,
    /// Maneuvers in declaration order.
    pub maneuvers: Vec<PlanManeuver>,
    /// Transitions in declaration order. Order matters: when more than one
    /// transition leaves the same maneuver, the first declared wins.
    #[serde(default)]
    pub transitions: Vec<PlanTransition>,
    /// Entity labels that must be active before execution begins.
    #[serde(default)]
    pub required_entities: Vec<String>,
}

// ============================================================================
// Mementos
// ============================================================================

/// A persisted per-maneuver resume token.
///
/// Pairs a plan and one of its maneuvers with the opaque state the vehicle
/// reported while executing that maneuver. Starting a plan from a memento
/// sets the start maneuver and re-injects the token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMemento {
    /// Identifier of this memento in the plan database.
    pub id: String,
    /// The plan this memento belongs to.
    pub plan_id: String,
    /// The maneuver that was active when the memento was taken.
    pub maneuver_id: String,
    /// Opaque resume payload.
    pub memento: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goto_speed_and_duration() {
        let m = Maneuver::Goto {
            lat: 0.71,
            lon: -0.15,
            z: 2.0,
            speed: 1.5,
            speed_units: SpeedUnits::MetersPerSecond,
        };
        assert_eq!(m.kind(), "Goto");
        assert_eq!(m.speed_mps(), Some(1.5));
        assert_eq!(m.timed_duration(), None);
    }

    #[test]
    fn test_rpm_speed_is_not_ground_speed() {
        let m = Maneuver::StationKeeping {
            lat: 0.71,
            lon: -0.15,
            radius: 20.0,
            duration: 120.0,
            speed: 1600.0,
            speed_units: SpeedUnits::Rpm,
        };
        assert_eq!(m.speed_mps(), None);
        assert_eq!(m.timed_duration(), Some(120.0));
    }

    #[test]
    fn test_idle_zero_duration_is_unbounded() {
        let m = Maneuver::Idle { duration: 0.0 };
        assert_eq!(m.timed_duration(), None);
        assert_eq!(m.position(), None);
    }

    #[test]
    fn test_plan_spec_serde_roundtrip() {
        let spec = PlanSpecification {
            plan_id: "survey-1".to_string(),
            description: String::new(),
            start_man_id: "A".to_string(),
            maneuvers: vec![PlanManeuver {
                maneuver_id: "A".to_string(),
                data: Maneuver::Idle { duration: 10.0 },
                memento: None,
            }],
            transitions: Vec::new(),
            required_entities: vec!["Sidescan".to_string()],
        };
        let json = serde_json::to_string(&spec).expect("serialize");
        let back: PlanSpecification = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, spec);
    }
}
