//! Calibration filler selection.
//!
//! While the vehicle calibrates, it still needs a maneuver to run. The
//! filler is a station-keeping at the current GPS position when so
//! configured (surface vehicles that must not drift), otherwise an idle
//! maneuver of zero duration.

use crate::config::EngineSection;
use crate::messages::{EstimatedState, Maneuver, PlanManeuver, SpeedUnits};

/// Maneuver id the filler is dispatched under. Outside the plan's id
/// space, so it never collides with a real maneuver.
pub const CALIBRATION_FILLER_ID: &str = "calibration";

/// Choose the maneuver to execute while calibrating.
pub fn calibration_filler(cfg: &EngineSection, fix: Option<&EstimatedState>) -> PlanManeuver {
    let data = match (cfg.station_keeping_while_calibrating, fix) {
        (true, Some(es)) => Maneuver::StationKeeping {
            lat: es.lat,
            lon: es.lon,
            radius: cfg.station_keeping_radius_m,
            duration: 0.0,
            speed: cfg.station_keeping_speed_rpm,
            speed_units: SpeedUnits::Rpm,
        },
        // No fix yet: station-keeping has nowhere to hold, fall back to idle
        _ => Maneuver::Idle { duration: 0.0 },
    };
    PlanManeuver {
        maneuver_id: CALIBRATION_FILLER_ID.to_string(),
        data,
        memento: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Header;

    fn fix() -> EstimatedState {
        EstimatedState {
            header: Header::default(),
            lat: 0.72,
            lon: -0.15,
            depth: 0.0,
            speed: 0.0,
        }
    }

    #[test]
    fn test_default_filler_is_idle() {
        let cfg = EngineSection::default();
        let filler = calibration_filler(&cfg, Some(&fix()));
        assert_eq!(filler.data, Maneuver::Idle { duration: 0.0 });
        assert_eq!(filler.maneuver_id, CALIBRATION_FILLER_ID);
    }

    #[test]
    fn test_station_keeping_filler_uses_fix_and_config() {
        let mut cfg = EngineSection::default();
        cfg.station_keeping_while_calibrating = true;
        cfg.station_keeping_radius_m = 25.0;
        cfg.station_keeping_speed_rpm = 1500.0;
        let filler = calibration_filler(&cfg, Some(&fix()));
        match filler.data {
            Maneuver::StationKeeping {
                lat,
                lon,
                radius,
                speed,
                speed_units,
                duration,
            } => {
                assert!((lat - 0.72).abs() < f64::EPSILON);
                assert!((lon + 0.15).abs() < f64::EPSILON);
                assert!((radius - 25.0).abs() < f64::EPSILON);
                assert!((speed - 1500.0).abs() < f64::EPSILON);
                assert_eq!(speed_units, SpeedUnits::Rpm);
                assert!((duration - 0.0).abs() < f64::EPSILON);
            }
            other => panic!("expected station keeping, got {:?}", other),
        }
    }

    #[test]
    fn test_station_keeping_without_fix_falls_back_to_idle() {
        let mut cfg = EngineSection::default();
        cfg.station_keeping_while_calibrating = true;
        let filler = calibration_filler(&cfg, None);
        assert_eq!(filler.data, Maneuver::Idle { duration: 0.0 });
    }
}
