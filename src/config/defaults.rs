//! System-wide default constants.
//!
//! Centralises the fixed timing and sizing constants of the engine.
//! Grouped by subsystem for easy discovery. Operator-tunable values live
//! in [`EngineConfig`](super::EngineConfig) instead.

// ============================================================================
// Vehicle dialog
// ============================================================================

/// Deadline for a vehicle-command reply (seconds).
///
/// A reply arriving at exactly the deadline is still accepted; the request
/// times out strictly after it.
pub const VEHICLE_REPLY_TIMEOUT_S: f64 = 2.5;

/// Maximum silence between `VehicleState` reports before the engine
/// considers the vehicle lost and blocks (seconds). Exclusive bound: an
/// interval of exactly this value does not trigger.
pub const VEHICLE_STATE_TIMEOUT_S: f64 = 2.5;

// ============================================================================
// Engine loop
// ============================================================================

/// Upper bound on a single bus wait (seconds). Timers are re-evaluated at
/// least this often even when the bus is silent.
pub const BUS_WAIT_MAX_S: f64 = 1.0;

/// Maximum plan-control requests queued behind an in-flight vehicle
/// command. Requests beyond this are answered with failure immediately.
pub const MAX_QUEUED_REQUESTS: usize = 32;

// ============================================================================
// Mementos
// ============================================================================

/// Plan executions the memento handler keeps snapshots for. Oldest entries
/// are evicted first.
pub const MAX_TRACKED_PLANS: usize = 8;

// ============================================================================
// Reporting
// ============================================================================

/// Default periodic `PlanControlState` publication rate (Hz).
pub const DEFAULT_STATE_REPORT_HZ: f64 = 3.0;

/// Default minimum calibration time (seconds).
pub const DEFAULT_MIN_CALIBRATION_S: f64 = 10.0;

// ============================================================================
// Calibration filler
// ============================================================================

/// Default station-keeping motor setpoint while calibrating (RPM).
pub const DEFAULT_SK_SPEED_RPM: f64 = 1600.0;

/// Default station-keeping radius while calibrating (meters).
pub const DEFAULT_SK_RADIUS_M: f64 = 20.0;

/// Default label of the entity whose activation gates the IMU-on branch of
/// fuel prediction.
pub const DEFAULT_IMU_LABEL: &str = "IMU";

// ============================================================================
// Fuel model
// ============================================================================

/// Default usable battery capacity (watt-hours).
pub const DEFAULT_BATTERY_CAPACITY_WH: f64 = 1400.0;

/// Default hotel load with the IMU off (watts).
pub const DEFAULT_HOTEL_LOAD_W: f64 = 35.0;

/// Default additional hotel load with the IMU on (watts).
pub const DEFAULT_IMU_LOAD_W: f64 = 12.0;

/// Default propulsion coefficient: watts drawn per (m/s)^3 of commanded
/// speed.
pub const DEFAULT_PROPULSION_COEFF: f64 = 18.0;

/// Default reserve below which a fuel forecast is reported insufficient
/// (percent of capacity).
pub const DEFAULT_FUEL_RESERVE_PCT: f64 = 10.0;

// ============================================================================
// Storage
// ============================================================================

/// Default root directory of the plan database.
pub const DEFAULT_DATA_DIR: &str = "./data/plans";
