//! Duration estimation and plan progress tracking.
//!
//! Estimates are computed once at parse time by walking the execution
//! chain: travel legs from great-circle distance over commanded speed,
//! timed maneuvers from their explicit duration. Progress is the fraction
//! of total estimated duration already behind the vehicle, fed by the
//! maneuver controller's ETA reports, and never decreases within one plan
//! execution.

use crate::messages::{Maneuver, ManeuverControlState, PlanManeuver};

/// Mean Earth radius (meters).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// ETA value the maneuver controller reports when it has no estimate.
const ETA_UNKNOWN: u16 = u16::MAX;

/// Great-circle distance between two WGS-84 positions in radians.
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Per-maneuver travel and duration estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ManeuverEstimate {
    pub maneuver_id: String,
    /// Travel distance to and within the maneuver (meters).
    pub distance_m: f64,
    /// Commanded ground speed, when expressed in m/s.
    pub speed_mps: Option<f64>,
    /// Estimated duration; `None` when it cannot be derived (unknown
    /// speed units, unbounded duration).
    pub duration_s: Option<f64>,
}

/// Estimate every maneuver of an execution chain.
///
/// `origin` is the vehicle position at plan start when known; the first
/// travel leg is measured from it. Without a fix the first leg counts as
/// zero distance, which keeps estimates usable on vehicles that start
/// plans at their first waypoint.
pub fn estimate_chain(chain: &[&PlanManeuver], origin: Option<(f64, f64)>) -> Vec<ManeuverEstimate> {
    let mut estimates = Vec::with_capacity(chain.len());
    let mut prev = origin;
    for pm in chain {
        let travel_m = match (prev, pm.data.position()) {
            (Some(a), Some(b)) => haversine_m(a, b),
            _ => 0.0,
        };
        let speed = pm.data.speed_mps();
        let travel_s = if travel_m > 0.0 {
            speed.map(|v| travel_m / v)
        } else {
            Some(0.0)
        };
        let duration_s = match &pm.data {
            // Goto is pure transit
            Maneuver::Goto { .. } => travel_s,
            // Timed maneuvers add their dwell to the travel leg
            Maneuver::Loiter { .. } | Maneuver::StationKeeping { .. } | Maneuver::Idle { .. } => {
                match (travel_s, pm.data.timed_duration()) {
                    (Some(t), Some(d)) => Some(t + d),
                    _ => None,
                }
            }
        };
        if let Some(p) = pm.data.position() {
            prev = Some(p);
        }
        estimates.push(ManeuverEstimate {
            maneuver_id: pm.maneuver_id.clone(),
            distance_m: travel_m,
            speed_mps: speed,
            duration_s,
        });
    }
    estimates
}

// ============================================================================
// Progress tracker
// ============================================================================

/// Tracks execution progress against the parse-time estimates.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    enabled: bool,
    estimates: Vec<ManeuverEstimate>,
    /// Sum of all estimated durations; `None` disables progress for the
    /// whole plan (any single unknown maneuver poisons the total).
    total_s: Option<f64>,
    /// Estimated seconds of completed maneuvers.
    completed_s: f64,
    /// Fraction [0, 1] of the current maneuver already behind us.
    current_fraction: f64,
    current: Option<usize>,
    last_pct: f32,
}

impl ProgressTracker {
    pub fn new(enabled: bool, estimates: Vec<ManeuverEstimate>) -> Self {
        let total_s = if estimates.is_empty() {
            None
        } else {
            estimates
                .iter()
                .map(|e| e.duration_s)
                .sum::<Option<f64>>()
        };
        Self {
            enabled,
            estimates,
            total_s,
            completed_s: 0.0,
            current_fraction: 0.0,
            current: None,
            last_pct: -1.0,
        }
    }

    /// Total estimated plan duration, when derivable.
    pub fn total_duration(&self) -> Option<f64> {
        self.total_s
    }

    pub fn plan_started(&mut self) {
        self.completed_s = 0.0;
        self.current_fraction = 0.0;
        self.current = None;
        self.last_pct = if self.enabled && self.total_s.is_some() {
            0.0
        } else {
            -1.0
        };
    }

    pub fn maneuver_started(&mut self, maneuver_id: &str) {
        self.current = self
            .estimates
            .iter()
            .position(|e| e.maneuver_id == maneuver_id);
        self.current_fraction = 0.0;
    }

    pub fn maneuver_done(&mut self) {
        if let Some(i) = self.current.take() {
            if let Some(d) = self.estimates[i].duration_s {
                self.completed_s += d;
            }
        }
        self.current_fraction = 0.0;
    }

    /// Fold a maneuver controller report into the plan progress percent.
    ///
    /// Returns -1 when progress is disabled or cannot be computed.
    pub fn update(&mut self, mcs: &ManeuverControlState) -> f32 {
        let Some(i) = self.current else {
            return self.progress();
        };
        if let (Some(d), false) = (self.estimates[i].duration_s, mcs.eta == ETA_UNKNOWN) {
            if d > 0.0 {
                let fraction = ((d - f64::from(mcs.eta)) / d).clamp(0.0, 1.0);
                // ETA reports can jitter; the fraction only moves forward.
                self.current_fraction = self.current_fraction.max(fraction);
            }
        }
        self.progress()
    }

    /// Current plan progress percent in [0, 100], or -1.
    pub fn progress(&mut self) -> f32 {
        if !self.enabled {
            return -1.0;
        }
        let Some(total) = self.total_s else {
            return -1.0;
        };
        if total <= 0.0 {
            return self.last_pct;
        }
        let current_s = self
            .current
            .and_then(|i| self.estimates[i].duration_s)
            .unwrap_or(0.0)
            * self.current_fraction;
        let pct = (((self.completed_s + current_s) / total) * 100.0).clamp(0.0, 100.0) as f32;
        // Monotonic within one execution
        self.last_pct = self.last_pct.max(pct);
        self.last_pct
    }

    /// Estimated seconds to plan completion, -1 when unknown. Works off
    /// the same elapsed bookkeeping as `progress` but does not require
    /// progress to be enabled.
    pub fn eta(&self) -> i32 {
        let Some(total) = self.total_s else {
            return -1;
        };
        let current_s = self
            .current
            .and_then(|i| self.estimates[i].duration_s)
            .unwrap_or(0.0)
            * self.current_fraction;
        let remaining = (total - self.completed_s - current_s).max(0.0);
        remaining.round() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Header, ManeuverState, SpeedUnits};

    fn estimate(id: &str, duration: Option<f64>) -> ManeuverEstimate {
        ManeuverEstimate {
            maneuver_id: id.to_string(),
            distance_m: 0.0,
            speed_mps: Some(1.0),
            duration_s: duration,
        }
    }

    fn mcs(eta: u16) -> ManeuverControlState {
        ManeuverControlState {
            header: Header::default(),
            state: ManeuverState::Execution,
            eta,
            info: String::new(),
        }
    }

    #[test]
    fn test_haversine_one_degree_longitude_at_equator() {
        let a = (0.0, 0.0);
        let b = (0.0, 1.0_f64.to_radians());
        let d = haversine_m(a, b);
        // ~111.19 km
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn test_goto_duration_from_distance_and_speed() {
        let pm = PlanManeuver {
            maneuver_id: "g".to_string(),
            data: Maneuver::Goto {
                lat: 0.0,
                lon: 1.0_f64.to_radians(),
                z: 0.0,
                speed: 2.0,
                speed_units: SpeedUnits::MetersPerSecond,
            },
            memento: None,
        };
        let est = estimate_chain(&[&pm], Some((0.0, 0.0)));
        assert_eq!(est.len(), 1);
        let duration = est[0].duration_s.expect("duration");
        assert!((duration - est[0].distance_m / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rpm_speed_gives_unknown_duration() {
        let pm = PlanManeuver {
            maneuver_id: "g".to_string(),
            data: Maneuver::Goto {
                lat: 0.0,
                lon: 1.0_f64.to_radians(),
                z: 0.0,
                speed: 1300.0,
                speed_units: SpeedUnits::Rpm,
            },
            memento: None,
        };
        let est = estimate_chain(&[&pm], Some((0.0, 0.0)));
        assert_eq!(est[0].duration_s, None);
    }

    #[test]
    fn test_progress_disabled_returns_minus_one() {
        let mut tracker = ProgressTracker::new(false, vec![estimate("a", Some(10.0))]);
        tracker.plan_started();
        tracker.maneuver_started("a");
        assert!((tracker.update(&mcs(5)) + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unknown_duration_poisons_whole_plan() {
        let mut tracker =
            ProgressTracker::new(true, vec![estimate("a", Some(10.0)), estimate("b", None)]);
        tracker.plan_started();
        tracker.maneuver_started("a");
        assert!((tracker.update(&mcs(5)) + 1.0).abs() < f32::EPSILON);
        assert_eq!(tracker.eta(), -1);
    }

    #[test]
    fn test_progress_accumulates_and_is_monotonic() {
        let mut tracker =
            ProgressTracker::new(true, vec![estimate("a", Some(10.0)), estimate("b", Some(10.0))]);
        tracker.plan_started();
        tracker.maneuver_started("a");

        // Half of maneuver a = 25% of the plan
        let p1 = tracker.update(&mcs(5));
        assert!((p1 - 25.0).abs() < 0.01, "got {p1}");

        // A jittering ETA must not move progress backwards
        let p2 = tracker.update(&mcs(9));
        assert!((p2 - 25.0).abs() < 0.01, "got {p2}");

        tracker.maneuver_done();
        tracker.maneuver_started("b");
        let p3 = tracker.update(&mcs(0));
        assert!((p3 - 100.0).abs() < 0.01, "got {p3}");
    }

    #[test]
    fn test_eta_counts_down() {
        let mut tracker =
            ProgressTracker::new(true, vec![estimate("a", Some(10.0)), estimate("b", Some(30.0))]);
        tracker.plan_started();
        assert_eq!(tracker.eta(), 40);
        tracker.maneuver_started("a");
        tracker.update(&mcs(5));
        assert_eq!(tracker.eta(), 35);
        tracker.maneuver_done();
        assert_eq!(tracker.eta(), 30);
    }
}
