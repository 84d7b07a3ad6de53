//! Bus message family of the plan engine.
//!
//! Incoming and outgoing messages are one tagged [`Message`] enum so the
//! engine can match them exhaustively: adding a message kind is a compile
//! error everywhere it is not handled. Every payload carries a [`Header`]
//! with source/destination addressing, which reply matching depends on.

pub mod control;
pub mod plan;
pub mod telemetry;

use serde::{Deserialize, Serialize};

pub use control::{
    EntityState, EntityStateKind, LastOutcome, LoggingControl, LoggingControlOp, MessageType,
    PlanArg, PlanControl, PlanControlOp, PlanControlState, PlanDb, PlanDbArg, PlanDbOp, PlanState,
    VehicleCommand, VehicleCommandKind, FLG_CALIBRATE,
};
pub use plan::{
    Maneuver, PlanManeuver, PlanMemento, PlanSpecification, PlanTransition, SpeedUnits,
};
pub use telemetry::{
    ActivationState, EntityActivationState, EntityInfo, EstimatedState, FuelLevel, Memento,
    ManeuverControlState, ManeuverState, OpMode, PowerOp, PowerOperation, RegisterManeuver,
    VehicleState, VFLG_MANEUVER_DONE,
};

/// Broadcast destination, system or entity.
pub const ADDR_ANY: u16 = 0xFFFF;

/// Broadcast destination entity.
pub const ENT_ANY: u8 = 0xFF;

// ============================================================================
// Header
// ============================================================================

/// Addressing and timing common to every bus message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Header {
    /// Source system id.
    pub src: u16,
    /// Source entity id within the source system.
    pub src_ent: u8,
    /// Destination system id, [`ADDR_ANY`] for broadcast.
    pub dst: u16,
    /// Destination entity id, [`ENT_ANY`] for broadcast.
    pub dst_ent: u8,
    /// Wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            src: 0,
            src_ent: 0,
            dst: ADDR_ANY,
            dst_ent: ENT_ANY,
            timestamp: 0.0,
        }
    }
}

impl Header {
    /// True when the message is addressed to the given system/entity pair,
    /// either directly or by broadcast.
    pub fn addressed_to(&self, system: u16, entity: u8) -> bool {
        (self.dst == system || self.dst == ADDR_ANY) && (self.dst_ent == entity || self.dst_ent == ENT_ANY)
    }
}

// ============================================================================
// Message
// ============================================================================

/// Every message kind the engine consumes or emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg")]
pub enum Message {
    PlanControl(PlanControl),
    PlanControlState(PlanControlState),
    PlanDb(PlanDb),
    VehicleCommand(VehicleCommand),
    VehicleState(VehicleState),
    ManeuverControlState(ManeuverControlState),
    EstimatedState(EstimatedState),
    EntityInfo(EntityInfo),
    EntityActivationState(EntityActivationState),
    EntityState(EntityState),
    FuelLevel(FuelLevel),
    Memento(Memento),
    PowerOperation(PowerOperation),
    RegisterManeuver(RegisterManeuver),
    LoggingControl(LoggingControl),
}

impl Message {
    /// The message header, regardless of kind.
    pub fn header(&self) -> &Header {
        match self {
            Message::PlanControl(m) => &m.header,
            Message::PlanControlState(m) => &m.header,
            Message::PlanDb(m) => &m.header,
            Message::VehicleCommand(m) => &m.header,
            Message::VehicleState(m) => &m.header,
            Message::ManeuverControlState(m) => &m.header,
            Message::EstimatedState(m) => &m.header,
            Message::EntityInfo(m) => &m.header,
            Message::EntityActivationState(m) => &m.header,
            Message::EntityState(m) => &m.header,
            Message::FuelLevel(m) => &m.header,
            Message::Memento(m) => &m.header,
            Message::PowerOperation(m) => &m.header,
            Message::RegisterManeuver(m) => &m.header,
            Message::LoggingControl(m) => &m.header,
        }
    }

    /// Message kind name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::PlanControl(_) => "PlanControl",
            Message::PlanControlState(_) => "PlanControlState",
            Message::PlanDb(_) => "PlanDB",
            Message::VehicleCommand(_) => "VehicleCommand",
            Message::VehicleState(_) => "VehicleState",
            Message::ManeuverControlState(_) => "ManeuverControlState",
            Message::EstimatedState(_) => "EstimatedState",
            Message::EntityInfo(_) => "EntityInfo",
            Message::EntityActivationState(_) => "EntityActivationState",
            Message::EntityState(_) => "EntityState",
            Message::FuelLevel(_) => "FuelLevel",
            Message::Memento(_) => "Memento",
            Message::PowerOperation(_) => "PowerOperation",
            Message::RegisterManeuver(_) => "RegisterManeuver",
            Message::LoggingControl(_) => "LoggingControl",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_addressing() {
        let direct = Header {
            src: 1,
            src_ent: 2,
            dst: 10,
            dst_ent: 20,
            timestamp: 0.0,
        };
        assert!(direct.addressed_to(10, 20));
        assert!(!direct.addressed_to(10, 21));
        assert!(!direct.addressed_to(11, 20));

        let broadcast = Header::default();
        assert!(broadcast.addressed_to(10, 20));
        assert!(broadcast.addressed_to(999, 0));
    }

    #[test]
    fn test_message_tagged_serde() {
        let msg = Message::FuelLevel(FuelLevel {
            header: Header::default(),
            value: 87.5,
            confidence: 90.0,
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains(r#""msg":"FuelLevel""#));
        let back: Message = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, msg);
    }
}
