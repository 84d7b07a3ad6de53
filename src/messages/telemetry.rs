//! Telemetry flowing into the engine: navigation, vehicle and maneuver
//! state, entity bookkeeping, fuel, mementos and power events.

use serde::{Deserialize, Serialize};

use super::Header;

// ============================================================================
// Navigation
// ============================================================================

/// Navigation solution of the vehicle.
///
/// Latitude/longitude in WGS-84 radians, depth in meters (positive down),
/// speed over ground in m/s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimatedState {
    pub header: Header,
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    pub speed: f64,
}

// ============================================================================
// Vehicle state
// ============================================================================

/// Operating mode reported by the vehicle controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OpMode {
    /// Controller starting up.
    #[default]
    Boot,
    /// Available for requests.
    Service,
    /// Running a calibration procedure.
    Calibration,
    /// Executing a maneuver.
    Maneuver,
    /// Driven by an external controller.
    ExternalControl,
    /// In error; not available for requests.
    Error,
}

impl std::fmt::Display for OpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpMode::Boot => write!(f, "BOOT"),
            OpMode::Service => write!(f, "SERVICE"),
            OpMode::Calibration => write!(f, "CALIBRATION"),
            OpMode::Maneuver => write!(f, "MANEUVER"),
            OpMode::ExternalControl => write!(f, "EXTERNAL"),
            OpMode::Error => write!(f, "ERROR"),
        }
    }
}

/// Set on `VehicleState.flags` when the vehicle finished its maneuver and
/// is waiting for the next command.
pub const VFLG_MANEUVER_DONE: u8 = 0x01;

/// Periodic state report from the vehicle controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleState {
    pub header: Header,
    pub op_mode: OpMode,
    /// Bitfield of `VFLG_*` flags.
    #[serde(default)]
    pub flags: u8,
    /// Estimated seconds to maneuver completion, 0xFFFF when unknown.
    #[serde(default)]
    pub maneuver_eta: u16,
    /// Description of the last error, empty when none.
    #[serde(default)]
    pub last_error: String,
}

impl VehicleState {
    pub fn maneuver_done(&self) -> bool {
        self.flags & VFLG_MANEUVER_DONE != 0
    }
}

// ============================================================================
// Maneuver state
// ============================================================================

/// Execution state of the maneuver controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManeuverState {
    Execution,
    Done,
    Error,
}

/// Progress report from the maneuver controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManeuverControlState {
    pub header: Header,
    pub state: ManeuverState,
    /// Estimated seconds to completion, 0xFFFF when unknown.
    pub eta: u16,
    #[serde(default)]
    pub info: String,
}

// ============================================================================
// Entities
// ============================================================================

/// Announcement of a named software entity on the vehicle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityInfo {
    pub header: Header,
    /// Entity id, unique on the source system.
    pub id: u8,
    pub label: String,
    #[serde(default)]
    pub component: String,
}

/// Activation state of an entity. The entity is identified by the source
/// entity id of the message header; the label is resolved through the
/// `EntityInfo` announcements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    Active,
    ActivationInProgress,
    ActivationFailed,
    DeactivationInProgress,
}

/// Activation state report of an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityActivationState {
    pub header: Header,
    pub state: ActivationState,
    #[serde(default)]
    pub error: String,
}

// ============================================================================
// Fuel
// ============================================================================

/// Remaining fuel estimate from the power monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuelLevel {
    pub header: Header,
    /// Remaining capacity percent in [0, 100].
    pub value: f64,
    /// Confidence of the estimate in [0, 100].
    #[serde(default)]
    pub confidence: f64,
}

// ============================================================================
// Mementos
// ============================================================================

/// Opaque resume state emitted by the vehicle while executing a maneuver.
///
/// `plan_ref` names the plan execution the memento belongs to, as counted
/// by the engine at each plan start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memento {
    pub header: Header,
    pub plan_ref: u32,
    pub maneuver_id: String,
    pub memento: String,
}

// ============================================================================
// Power
// ============================================================================

/// Power manager operations relevant to the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerOp {
    PowerDownInProgress,
    PowerDownAborted,
}

/// Power manager notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PowerOperation {
    pub header: Header,
    pub op: PowerOp,
}

// ============================================================================
// Maneuver registry
// ============================================================================

/// Announcement that the vehicle supports a maneuver kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterManeuver {
    pub header: Header,
    /// Maneuver kind name as produced by [`Maneuver::kind`](super::plan::Maneuver::kind).
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maneuver_done_flag() {
        let mut vs = VehicleState {
            header: Header::default(),
            op_mode: OpMode::Maneuver,
            flags: 0,
            maneuver_eta: 30,
            last_error: String::new(),
        };
        assert!(!vs.maneuver_done());
        vs.flags |= VFLG_MANEUVER_DONE;
        assert!(vs.maneuver_done());
    }
}
