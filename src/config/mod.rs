//! Engine configuration loaded from TOML.
//!
//! Every operator-tunable value is a field here; each section implements
//! `Default` with the values from [`defaults`], so behaviour is identical
//! when no config file is present.
//!
//! ## Loading Order
//!
//! 1. `HELMSMAN_CONFIG` environment variable (path to TOML file)
//! 2. `helmsman.toml` in the current working directory
//! 3. Built-in defaults

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use defaults::{
    DEFAULT_BATTERY_CAPACITY_WH, DEFAULT_DATA_DIR, DEFAULT_FUEL_RESERVE_PCT, DEFAULT_HOTEL_LOAD_W,
    DEFAULT_IMU_LABEL, DEFAULT_IMU_LOAD_W, DEFAULT_MIN_CALIBRATION_S, DEFAULT_PROPULSION_COEFF,
    DEFAULT_SK_RADIUS_M, DEFAULT_SK_SPEED_RPM, DEFAULT_STATE_REPORT_HZ,
};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {}: {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

/// Bus addressing of the engine and of the vehicle controller it talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityConfig {
    /// System id of this vehicle on the bus.
    pub system_id: u16,
    /// Entity id of the plan engine within the system.
    pub entity_id: u8,
    /// System id vehicle commands are addressed to.
    pub vehicle_system_id: u16,
    /// Entity id of the vehicle controller.
    pub vehicle_entity_id: u8,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            system_id: 0x0010,
            entity_id: 1,
            vehicle_system_id: 0x0010,
            vehicle_entity_id: 2,
        }
    }
}

/// Engine behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSection {
    /// Enable plan progress computation.
    pub compute_progress: bool,
    /// Enable the fuel predictor.
    pub fuel_prediction: bool,
    /// Periodic `PlanControlState` publication rate (Hz).
    pub state_report_hz: f64,
    /// Minimum calibration duration (seconds).
    pub minimum_calibration_time_s: f64,
    /// Honour the CALIBRATE flag on start requests.
    pub perform_calibration: bool,
    /// Abort initialization when a required entity fails to activate.
    /// When false the failure is logged and initialization continues.
    pub abort_on_failed_activation: bool,
    /// Station-keep at the current position while calibrating instead of
    /// idling.
    pub station_keeping_while_calibrating: bool,
    /// Station-keeping motor setpoint while calibrating (RPM).
    pub station_keeping_speed_rpm: f64,
    /// Station-keeping radius while calibrating (meters).
    pub station_keeping_radius_m: f64,
    /// Label of the entity whose activation state gates the IMU-on branch
    /// of fuel prediction.
    pub imu_entity_label: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            compute_progress: false,
            fuel_prediction: true,
            state_report_hz: DEFAULT_STATE_REPORT_HZ,
            minimum_calibration_time_s: DEFAULT_MIN_CALIBRATION_S,
            perform_calibration: true,
            abort_on_failed_activation: false,
            station_keeping_while_calibrating: false,
            station_keeping_speed_rpm: DEFAULT_SK_SPEED_RPM,
            station_keeping_radius_m: DEFAULT_SK_RADIUS_M,
            imu_entity_label: DEFAULT_IMU_LABEL.to_string(),
        }
    }
}

/// Fuel prediction model constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuelSection {
    /// Usable battery capacity (watt-hours).
    pub battery_capacity_wh: f64,
    /// Hotel load with the IMU off (watts).
    pub hotel_load_w: f64,
    /// Additional hotel load with the IMU on (watts).
    pub imu_load_w: f64,
    /// Propulsion watts per (m/s)^3 of commanded speed.
    pub propulsion_coeff: f64,
    /// Reserve below which a forecast is insufficient (percent).
    pub reserve_pct: f64,
}

impl Default for FuelSection {
    fn default() -> Self {
        Self {
            battery_capacity_wh: DEFAULT_BATTERY_CAPACITY_WH,
            hotel_load_w: DEFAULT_HOTEL_LOAD_W,
            imu_load_w: DEFAULT_IMU_LOAD_W,
            propulsion_coeff: DEFAULT_PROPULSION_COEFF,
            reserve_pct: DEFAULT_FUEL_RESERVE_PCT,
        }
    }
}

/// Plan database location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbSection {
    /// Root directory of the persistent plan store.
    pub data_dir: PathBuf,
}

impl Default for DbSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration of the plan engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub fuel: FuelSection,
    #[serde(default)]
    pub db: DbSection,
}

impl EngineConfig {
    /// Load configuration using the standard search order:
    /// 1. `HELMSMAN_CONFIG` environment variable
    /// 2. `./helmsman.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("HELMSMAN_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from HELMSMAN_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from HELMSMAN_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "HELMSMAN_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("helmsman.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./helmsman.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./helmsman.toml, using defaults");
                }
            }
        }

        info!("No helmsman.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.state_report_hz <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "engine.state_report_hz must be positive (got {})",
                self.engine.state_report_hz
            )));
        }
        if self.engine.minimum_calibration_time_s < 0.0 {
            return Err(ConfigError::Invalid(
                "engine.minimum_calibration_time_s must not be negative".to_string(),
            ));
        }
        if self.engine.station_keeping_radius_m <= 0.0 {
            return Err(ConfigError::Invalid(
                "engine.station_keeping_radius_m must be positive".to_string(),
            ));
        }
        if self.fuel.battery_capacity_wh <= 0.0 {
            return Err(ConfigError::Invalid(
                "fuel.battery_capacity_wh must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.fuel.reserve_pct) {
            return Err(ConfigError::Invalid(format!(
                "fuel.reserve_pct must be within [0, 100] (got {})",
                self.fuel.reserve_pct
            )));
        }
        Ok(())
    }
}
