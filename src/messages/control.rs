//! Control-plane messages: plan control, plan database, vehicle commands.
//!
//! These are the request/reply message pairs of the engine. Each carries a
//! `request_id` so replies can be paired with the request that caused them,
//! and a four-valued type field (request, success, failure, in-progress)
//! shared by all three families.

use serde::{Deserialize, Serialize};

use super::plan::{Maneuver, PlanManeuver, PlanMemento, PlanSpecification};
use super::Header;

/// Calibrate-before-execution flag on `PlanControl` start requests.
pub const FLG_CALIBRATE: u16 = 0x0001;

/// Direction/outcome discriminator shared by request/reply message pairs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Success,
    Failure,
    InProgress,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Request => write!(f, "request"),
            MessageType::Success => write!(f, "success"),
            MessageType::Failure => write!(f, "failure"),
            MessageType::InProgress => write!(f, "in progress"),
        }
    }
}

// ============================================================================
// PlanControl
// ============================================================================

/// Operations an operator can request from the plan engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlanControlOp {
    /// Load and start executing a plan.
    Start,
    /// Stop the plan in execution.
    Stop,
    /// Load a plan without executing it.
    Load,
    /// Return the currently loaded plan.
    Get,
}

impl std::fmt::Display for PlanControlOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanControlOp::Start => write!(f, "START"),
            PlanControlOp::Stop => write!(f, "STOP"),
            PlanControlOp::Load => write!(f, "LOAD"),
            PlanControlOp::Get => write!(f, "GET"),
        }
    }
}

/// Argument of a `PlanControl` start/load request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum PlanArg {
    /// A full plan specification, stored then executed.
    Spec(PlanSpecification),
    /// A resume token; the referenced plan is loaded from the database.
    Memento(PlanMemento),
    /// A bare maneuver, wrapped into a single-maneuver quick plan.
    QuickManeuver(Maneuver),
}

/// Operator request to the plan engine, or the engine's reply to one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanControl {
    pub header: Header,
    pub ctype: MessageType,
    pub op: PlanControlOp,
    /// Caller-chosen id echoed on the reply.
    pub request_id: u16,
    pub plan_id: String,
    /// Bitfield of `FLG_*` flags.
    #[serde(default)]
    pub flags: u16,
    #[serde(default)]
    pub arg: Option<PlanArg>,
    /// Human-readable detail on replies.
    #[serde(default)]
    pub info: String,
}

// ============================================================================
// PlanControlState
// ============================================================================

/// Externally visible engine state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlanState {
    /// The vehicle is not available for plan execution.
    #[default]
    Blocked,
    /// Idle and accepting requests.
    Ready,
    /// A plan is loaded and pre-execution steps (activation, calibration)
    /// are under way.
    Initializing,
    /// A plan is executing.
    Executing,
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanState::Blocked => write!(f, "BLOCKED"),
            PlanState::Ready => write!(f, "READY"),
            PlanState::Initializing => write!(f, "INITIALIZING"),
            PlanState::Executing => write!(f, "EXECUTING"),
        }
    }
}

/// Outcome of the last plan that reached a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LastOutcome {
    #[default]
    None,
    Success,
    Failure,
}

/// Continuous status published by the engine, periodically and on change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanControlState {
    pub header: Header,
    pub state: PlanState,
    /// Id of the plan in execution, empty when none.
    pub plan_id: String,
    /// Estimated seconds to plan completion, -1 when unknown.
    pub plan_eta: i32,
    /// Plan progress percent in [0, 100], -1 when unavailable.
    pub plan_progress: f32,
    /// Id of the maneuver in execution, empty when none.
    pub man_id: String,
    pub last_outcome: LastOutcome,
}

// ============================================================================
// PlanDB
// ============================================================================

/// Operations on the persistent plan store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlanDbOp {
    Set,
    Get,
    Del,
    Clear,
}

impl std::fmt::Display for PlanDbOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanDbOp::Set => write!(f, "SET"),
            PlanDbOp::Get => write!(f, "GET"),
            PlanDbOp::Del => write!(f, "DEL"),
            PlanDbOp::Clear => write!(f, "CLEAR"),
        }
    }
}

/// Record argument of a `PlanDB` set request or get reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum PlanDbArg {
    Spec(PlanSpecification),
    Memento(PlanMemento),
}

/// Externally initiated plan-database operation, or its reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDb {
    pub header: Header,
    pub dtype: MessageType,
    pub op: PlanDbOp,
    pub request_id: u16,
    pub plan_id: String,
    #[serde(default)]
    pub arg: Option<PlanDbArg>,
    #[serde(default)]
    pub info: String,
}

// ============================================================================
// VehicleCommand
// ============================================================================

/// Commands the engine issues to the vehicle controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VehicleCommandKind {
    ExecManeuver,
    StopManeuver,
    StartCalibration,
    StopCalibration,
}

impl std::fmt::Display for VehicleCommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleCommandKind::ExecManeuver => write!(f, "EXEC_MANEUVER"),
            VehicleCommandKind::StopManeuver => write!(f, "STOP_MANEUVER"),
            VehicleCommandKind::StartCalibration => write!(f, "START_CALIBRATION"),
            VehicleCommandKind::StopCalibration => write!(f, "STOP_CALIBRATION"),
        }
    }
}

/// Request to the vehicle controller, or the controller's reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleCommand {
    pub header: Header,
    pub vtype: MessageType,
    pub command: VehicleCommandKind,
    pub request_id: u16,
    /// The maneuver to execute, present on `ExecManeuver` requests.
    #[serde(default)]
    pub maneuver: Option<PlanManeuver>,
    /// Estimated calibration time in seconds, on `StartCalibration`.
    #[serde(default)]
    pub calib_time: u16,
    #[serde(default)]
    pub info: String,
}

// ============================================================================
// LoggingControl
// ============================================================================

/// Logging subsystem operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoggingControlOp {
    RequestStart,
    RequestStop,
}

/// Request to the logging subsystem to open or close a named log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingControl {
    pub header: Header,
    pub op: LoggingControlOp,
    pub name: String,
}

// ============================================================================
// EntityState
// ============================================================================

/// Coarse health of a software entity, reported to the task supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EntityStateKind {
    #[default]
    Boot,
    Normal,
    Error,
}

impl std::fmt::Display for EntityStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityStateKind::Boot => write!(f, "BOOT"),
            EntityStateKind::Normal => write!(f, "NORMAL"),
            EntityStateKind::Error => write!(f, "ERROR"),
        }
    }
}

/// The engine's own health report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub header: Header,
    pub state: EntityStateKind,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_control_serde_roundtrip() {
        let pc = PlanControl {
            header: Header::default(),
            ctype: MessageType::Request,
            op: PlanControlOp::Start,
            request_id: 7,
            plan_id: "p1".to_string(),
            flags: FLG_CALIBRATE,
            arg: None,
            info: String::new(),
        };
        let json = serde_json::to_string(&pc).expect("serialize");
        let back: PlanControl = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, pc);
    }

    #[test]
    fn test_quick_maneuver_arg_roundtrip() {
        let pc = PlanControl {
            header: Header::default(),
            ctype: MessageType::Request,
            op: PlanControlOp::Start,
            request_id: 3,
            plan_id: "hold".to_string(),
            flags: 0,
            arg: Some(PlanArg::QuickManeuver(super::super::plan::Maneuver::Idle {
                duration: 60.0,
            })),
            info: String::new(),
        };
        let json = serde_json::to_string(&pc).expect("serialize");
        let back: PlanControl = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, pc);
    }

    #[test]
    fn test_optional_fields_default_on_deserialize() {
        let json = r#"{
            "header": {"src":1,"src_ent":2,"dst":3,"dst_ent":4,"timestamp":0.0},
            "ctype":"Request","op":"Stop","request_id":1,"plan_id":""
        }"#;
        let pc: PlanControl = serde_json::from_str(json).expect("deserialize");
        assert_eq!(pc.flags, 0);
        assert!(pc.arg.is_none());
        assert!(pc.info.is_empty());
    }
}
