//! Plan fuel predictor.
//!
//! Integrates per-maneuver predicted energy draw against the last observed
//! fuel level. The draw model is deliberately coarse: a constant hotel
//! load (higher with the IMU powered), plus a propulsion term cubic in
//! commanded speed. Maneuvers whose duration cannot be estimated
//! contribute nothing, which biases the forecast optimistic; consumers
//! treat the result as advisory.

use tracing::debug;

use crate::config::FuelSection;
use crate::messages::FuelLevel;

use super::progress::ManeuverEstimate;

/// Outcome of a fuel forecast for one plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelForecast {
    /// Whether the predicted remaining level stays above the configured
    /// reserve for the whole plan.
    pub sufficient: bool,
    /// Predicted remaining capacity at plan completion (percent).
    pub predicted_remaining_pct: f64,
}

/// Predicts whether the battery covers a plan.
#[derive(Debug)]
pub struct FuelPredictor {
    cfg: FuelSection,
    enabled: bool,
    /// Last observed (level percent, confidence percent).
    last_level: Option<(f64, f64)>,
}

impl FuelPredictor {
    pub fn new(cfg: FuelSection, enabled: bool) -> Self {
        Self {
            cfg,
            enabled,
            last_level: None,
        }
    }

    /// Feed a fuel level observation. Kept across plans.
    pub fn on_fuel_level(&mut self, fl: &FuelLevel) {
        self.last_level = Some((fl.value, fl.confidence));
    }

    pub fn last_level_pct(&self) -> Option<f64> {
        self.last_level.map(|(v, _)| v)
    }

    /// Predicted energy draw of a plan (watt-hours).
    pub fn plan_energy_wh(&self, estimates: &[ManeuverEstimate], imu_enabled: bool) -> f64 {
        let hotel_w = if imu_enabled {
            self.cfg.hotel_load_w + self.cfg.imu_load_w
        } else {
            self.cfg.hotel_load_w
        };
        estimates
            .iter()
            .filter_map(|e| {
                let duration_s = e.duration_s?;
                let speed = e.speed_mps.unwrap_or(0.0);
                let draw_w = hotel_w + self.cfg.propulsion_coeff * speed.powi(3);
                Some(draw_w * duration_s / 3600.0)
            })
            .sum()
    }

    /// Forecast the battery at plan completion. `None` when prediction is
    /// disabled or no fuel level has been observed yet.
    pub fn forecast(&self, estimates: &[ManeuverEstimate], imu_enabled: bool) -> Option<FuelForecast> {
        if !self.enabled {
            return None;
        }
        let (level_pct, confidence) = self.last_level?;
        let energy_wh = self.plan_energy_wh(estimates, imu_enabled);
        let drawdown_pct = energy_wh / self.cfg.battery_capacity_wh * 100.0;
        let predicted_remaining_pct = level_pct - drawdown_pct;
        let forecast = FuelForecast {
            sufficient: predicted_remaining_pct >= self.cfg.reserve_pct,
            predicted_remaining_pct,
        };
        debug!(
            energy_wh,
            level_pct,
            confidence,
            remaining = predicted_remaining_pct,
            sufficient = forecast.sufficient,
            imu = imu_enabled,
            "Fuel forecast"
        );
        Some(forecast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Header;

    fn estimate(duration_s: Option<f64>, speed: Option<f64>) -> ManeuverEstimate {
        ManeuverEstimate {
            maneuver_id: "m".to_string(),
            distance_m: 0.0,
            speed_mps: speed,
            duration_s,
        }
    }

    fn level(value: f64) -> FuelLevel {
        FuelLevel {
            header: Header::default(),
            value,
            confidence: 95.0,
        }
    }

    fn predictor() -> FuelPredictor {
        FuelPredictor::new(FuelSection::default(), true)
    }

    #[test]
    fn test_no_observation_means_no_forecast() {
        let p = predictor();
        assert!(p.forecast(&[estimate(Some(100.0), Some(1.0))], false).is_none());
    }

    #[test]
    fn test_disabled_predictor_is_silent() {
        let mut p = FuelPredictor::new(FuelSection::default(), false);
        p.on_fuel_level(&level(80.0));
        assert!(p.forecast(&[estimate(Some(100.0), Some(1.0))], false).is_none());
    }

    #[test]
    fn test_imu_on_draws_more() {
        let p = predictor();
        let est = [estimate(Some(3600.0), Some(1.0))];
        let off = p.plan_energy_wh(&est, false);
        let on = p.plan_energy_wh(&est, true);
        assert!(on > off);
        assert!((on - off - FuelSection::default().imu_load_w).abs() < 1e-9);
    }

    #[test]
    fn test_long_plan_is_insufficient() {
        let mut p = predictor();
        p.on_fuel_level(&level(15.0));
        // 10 hours at 2 m/s draws far more than 15% of a default battery
        let est = [estimate(Some(36_000.0), Some(2.0))];
        let forecast = p.forecast(&est, true).expect("forecast");
        assert!(!forecast.sufficient);
        assert!(forecast.predicted_remaining_pct < FuelSection::default().reserve_pct);
    }

    #[test]
    fn test_short_plan_is_sufficient() {
        let mut p = predictor();
        p.on_fuel_level(&level(90.0));
        let est = [estimate(Some(600.0), Some(1.0))];
        let forecast = p.forecast(&est, false).expect("forecast");
        assert!(forecast.sufficient);
        assert!(forecast.predicted_remaining_pct < 90.0);
    }
}
