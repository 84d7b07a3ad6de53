//! Calibration supervision.
//!
//! Calibration is a pre-execution vehicle procedure (sensor warm-up, bias
//! estimation). The engine enforces a minimum duration: the countdown
//! starts when the engine confirms the calibration command, and the
//! procedure is only considered done once the countdown elapsed AND the
//! vehicle actually reports the CALIBRATION operating mode. A vehicle
//! error before completion marks the calibration failed.

use crate::messages::{OpMode, VehicleState};

#[derive(Debug)]
pub struct CalibrationSupervisor {
    min_time_s: f64,
    started_at: Option<f64>,
    /// Vehicle has been seen in CALIBRATION mode since start.
    seen_calibration_mode: bool,
    failed: Option<String>,
}

impl CalibrationSupervisor {
    pub fn new(min_time_s: f64) -> Self {
        Self {
            min_time_s,
            started_at: None,
            seen_calibration_mode: false,
            failed: None,
        }
    }

    /// Begin the countdown. Called when the vehicle confirms the
    /// calibration command.
    pub fn start(&mut self, now: f64) {
        self.started_at = Some(now);
        self.seen_calibration_mode = false;
        self.failed = None;
    }

    /// Forget any calibration in progress.
    pub fn reset(&mut self) {
        self.started_at = None;
        self.seen_calibration_mode = false;
        self.failed = None;
    }

    pub fn in_progress(&self) -> bool {
        self.started_at.is_some() && self.failed.is_none()
    }

    /// Fold a vehicle state report into the supervision.
    pub fn update(&mut self, vs: &VehicleState, now: f64) {
        if self.started_at.is_none() || self.failed.is_some() || self.is_done(now) {
            return;
        }
        match vs.op_mode {
            OpMode::Calibration => self.seen_calibration_mode = true,
            OpMode::Error => {
                let cause = if vs.last_error.is_empty() {
                    "vehicle error during calibration".to_string()
                } else {
                    vs.last_error.clone()
                };
                self.failed = Some(cause);
            }
            _ => {}
        }
    }

    /// Done only when the minimum time elapsed and the vehicle confirmed
    /// the CALIBRATION mode.
    pub fn is_done(&self, now: f64) -> bool {
        match self.started_at {
            Some(t0) => {
                self.failed.is_none() && self.seen_calibration_mode && now - t0 >= self.min_time_s
            }
            None => false,
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed.is_some()
    }

    /// Human-readable state of the calibration.
    pub fn info(&self, now: f64) -> String {
        if let Some(cause) = &self.failed {
            return format!("calibration failed: {}", cause);
        }
        match self.started_at {
            Some(t0) => {
                let remaining = (self.min_time_s - (now - t0)).max(0.0);
                if self.is_done(now) {
                    "calibration done".to_string()
                } else {
                    format!("calibrating, {:.0} s remaining", remaining.ceil())
                }
            }
            None => "calibration not started".to_string(),
        }
    }

    /// Estimated total calibration time in seconds, reported to the
    /// vehicle on the calibration command.
    pub fn estimated_time_s(&self) -> f64 {
        self.min_time_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Header;

    fn vs(op_mode: OpMode, last_error: &str) -> VehicleState {
        VehicleState {
            header: Header::default(),
            op_mode,
            flags: 0,
            maneuver_eta: 0,
            last_error: last_error.to_string(),
        }
    }

    #[test]
    fn test_not_done_before_countdown() {
        let mut cal = CalibrationSupervisor::new(10.0);
        cal.start(100.0);
        cal.update(&vs(OpMode::Calibration, ""), 101.0);
        assert!(!cal.is_done(105.0));
        assert!(cal.is_done(110.0));
    }

    #[test]
    fn test_countdown_alone_is_not_enough() {
        let mut cal = CalibrationSupervisor::new(10.0);
        cal.start(100.0);
        // Vehicle never entered CALIBRATION mode
        cal.update(&vs(OpMode::Service, ""), 105.0);
        assert!(!cal.is_done(120.0));
    }

    #[test]
    fn test_vehicle_error_fails_calibration() {
        let mut cal = CalibrationSupervisor::new(10.0);
        cal.start(100.0);
        cal.update(&vs(OpMode::Calibration, ""), 102.0);
        cal.update(&vs(OpMode::Error, "imu bias diverged"), 104.0);
        assert!(cal.has_failed());
        assert!(!cal.is_done(200.0));
        assert!(cal.info(104.0).contains("imu bias diverged"));
    }

    #[test]
    fn test_error_after_done_is_ignored() {
        let mut cal = CalibrationSupervisor::new(10.0);
        cal.start(100.0);
        cal.update(&vs(OpMode::Calibration, ""), 101.0);
        assert!(cal.is_done(111.0));
        // Vehicle errors later, once calibration already completed
        cal.update(&vs(OpMode::Error, "later fault"), 112.0);
        assert!(!cal.has_failed());
        assert!(cal.is_done(112.0));
    }

    #[test]
    fn test_info_strings() {
        let mut cal = CalibrationSupervisor::new(10.0);
        assert_eq!(cal.info(0.0), "calibration not started");
        cal.start(100.0);
        assert!(cal.info(103.0).contains("remaining"));
        cal.update(&vs(OpMode::Calibration, ""), 104.0);
        assert_eq!(cal.info(115.0), "calibration done");
    }
}
