//! Vehicle Dialog
//!
//! Issues commands to the vehicle controller and tracks the single
//! in-flight request against its reply deadline. At most one vehicle
//! request exists at a time; the engine queues everything else.
//!
//! Request ids are a monotonically increasing 16-bit counter. Wraparound
//! is safe because at most one request is ever in flight; the counter is
//! additionally reset whenever the engine drops back to READY, so a late
//! reply from before a mode change can never match a fresh request.

use tracing::debug;

use crate::config::{defaults::VEHICLE_REPLY_TIMEOUT_S, IdentityConfig};
use crate::messages::{
    Header, MessageType, PlanManeuver, VehicleCommand, VehicleCommandKind,
};

/// The single vehicle command awaiting its reply.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub request_id: u16,
    pub command: VehicleCommandKind,
    /// Reply deadline (monotonic seconds). Inclusive: a reply at exactly
    /// the deadline is accepted.
    pub deadline: f64,
}

/// Reply outcome after matching and downgrade rules are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogReply {
    Success(VehicleCommandKind),
    Failure(VehicleCommandKind, String),
    /// The vehicle is still working on it; the deadline is left intact.
    InProgress(VehicleCommandKind),
}

#[derive(Debug)]
pub struct VehicleDialog {
    identity: IdentityConfig,
    next_request_id: u16,
    in_flight: Option<PendingCommand>,
}

impl VehicleDialog {
    pub fn new(identity: IdentityConfig) -> Self {
        Self {
            identity,
            next_request_id: 0,
            in_flight: None,
        }
    }

    pub fn pending(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&PendingCommand> {
        self.in_flight.as_ref()
    }

    /// True when the in-flight request's deadline has passed.
    pub fn timed_out(&self, now: f64) -> bool {
        self.in_flight.as_ref().is_some_and(|p| now > p.deadline)
    }

    /// Build and register a vehicle command request.
    ///
    /// Must not be called while a request is pending; the engine's queue
    /// guarantees that.
    pub fn request(
        &mut self,
        command: VehicleCommandKind,
        maneuver: Option<PlanManeuver>,
        calib_time: u16,
        now: f64,
    ) -> VehicleCommand {
        debug_assert!(self.in_flight.is_none(), "vehicle request already in flight");
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.in_flight = Some(PendingCommand {
            request_id,
            command,
            deadline: now + VEHICLE_REPLY_TIMEOUT_S,
        });
        debug!(%command, request_id, "Vehicle command dispatched");
        VehicleCommand {
            header: Header {
                src: self.identity.system_id,
                src_ent: self.identity.entity_id,
                dst: self.identity.vehicle_system_id,
                dst_ent: self.identity.vehicle_entity_id,
                timestamp: 0.0,
            },
            vtype: MessageType::Request,
            command,
            request_id,
            maneuver,
            calib_time,
            info: String::new(),
        }
    }

    /// Match a vehicle command reply against the in-flight request.
    ///
    /// A reply counts only when its request id matches and it is addressed
    /// to this engine; anything else is ignored (stale replies after a
    /// counter bump land here). A FAILURE reply to STOP_CALIBRATION is
    /// downgraded to success: stop-calibration is best-effort and a
    /// vehicle that was not calibrating is not an error.
    pub fn on_reply(&mut self, vc: &VehicleCommand) -> Option<DialogReply> {
        if vc.vtype == MessageType::Request {
            return None;
        }
        let pending = self.in_flight.as_ref()?;
        if vc.request_id != pending.request_id
            || !vc
                .header
                .addressed_to(self.identity.system_id, self.identity.entity_id)
        {
            debug!(
                reply_id = vc.request_id,
                pending_id = pending.request_id,
                "Ignoring unmatched vehicle reply"
            );
            return None;
        }
        let command = pending.command;
        match vc.vtype {
            MessageType::InProgress => Some(DialogReply::InProgress(command)),
            MessageType::Success => {
                self.in_flight = None;
                Some(DialogReply::Success(command))
            }
            MessageType::Failure => {
                self.in_flight = None;
                if command == VehicleCommandKind::StopCalibration {
                    Some(DialogReply::Success(command))
                } else {
                    Some(DialogReply::Failure(command, vc.info.clone()))
                }
            }
            // Filtered at the top of the function
            MessageType::Request => None,
        }
    }

    /// Drop the in-flight request and bump the counter so any late reply
    /// to it can no longer match.
    pub fn clear(&mut self) {
        if self.in_flight.take().is_some() {
            self.next_request_id = self.next_request_id.wrapping_add(1);
        }
    }

    /// Deterministic counter reset on mode change to READY.
    pub fn reset_counter(&mut self) {
        self.in_flight = None;
        self.next_request_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog() -> VehicleDialog {
        VehicleDialog::new(IdentityConfig::default())
    }

    fn reply(request_id: u16, vtype: MessageType) -> VehicleCommand {
        let identity = IdentityConfig::default();
        VehicleCommand {
            header: Header {
                src: identity.vehicle_system_id,
                src_ent: identity.vehicle_entity_id,
                dst: identity.system_id,
                dst_ent: identity.entity_id,
                timestamp: 0.0,
            },
            vtype,
            command: VehicleCommandKind::ExecManeuver,
            request_id,
            maneuver: None,
            calib_time: 0,
            info: "boom".to_string(),
        }
    }

    #[test]
    fn test_request_reply_cycle() {
        let mut d = dialog();
        let cmd = d.request(VehicleCommandKind::ExecManeuver, None, 0, 100.0);
        assert!(d.pending());
        assert_eq!(cmd.request_id, 0);

        let outcome = d.on_reply(&reply(0, MessageType::Success)).expect("match");
        assert_eq!(outcome, DialogReply::Success(VehicleCommandKind::ExecManeuver));
        assert!(!d.pending());
    }

    #[test]
    fn test_mismatched_request_id_ignored() {
        let mut d = dialog();
        d.request(VehicleCommandKind::ExecManeuver, None, 0, 100.0);
        assert!(d.on_reply(&reply(99, MessageType::Success)).is_none());
        assert!(d.pending());
    }

    #[test]
    fn test_reply_to_wrong_destination_ignored() {
        let mut d = dialog();
        d.request(VehicleCommandKind::ExecManeuver, None, 0, 100.0);
        let mut r = reply(0, MessageType::Success);
        r.header.dst = 0x0999;
        assert!(d.on_reply(&r).is_none());
        assert!(d.pending());
    }

    #[test]
    fn test_in_progress_keeps_deadline() {
        let mut d = dialog();
        d.request(VehicleCommandKind::ExecManeuver, None, 0, 100.0);
        let deadline = d.in_flight().expect("pending").deadline;
        let outcome = d.on_reply(&reply(0, MessageType::InProgress)).expect("match");
        assert_eq!(outcome, DialogReply::InProgress(VehicleCommandKind::ExecManeuver));
        assert!(d.pending());
        assert!((d.in_flight().expect("pending").deadline - deadline).abs() < f64::EPSILON);
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let mut d = dialog();
        d.request(VehicleCommandKind::ExecManeuver, None, 0, 100.0);
        assert!(!d.timed_out(100.0 + VEHICLE_REPLY_TIMEOUT_S));
        assert!(d.timed_out(100.0 + VEHICLE_REPLY_TIMEOUT_S + 0.001));
    }

    #[test]
    fn test_stop_calibration_failure_downgraded() {
        let mut d = dialog();
        d.request(VehicleCommandKind::StopCalibration, None, 0, 100.0);
        let mut r = reply(0, MessageType::Failure);
        r.command = VehicleCommandKind::StopCalibration;
        let outcome = d.on_reply(&r).expect("match");
        assert_eq!(
            outcome,
            DialogReply::Success(VehicleCommandKind::StopCalibration)
        );
    }

    #[test]
    fn test_clear_bumps_counter_so_late_reply_misses() {
        let mut d = dialog();
        d.request(VehicleCommandKind::ExecManeuver, None, 0, 100.0);
        d.clear();
        assert!(!d.pending());
        // Late reply for the cleared request
        assert!(d.on_reply(&reply(0, MessageType::Success)).is_none());
        // Next request gets a fresh id
        let cmd = d.request(VehicleCommandKind::ExecManeuver, None, 0, 200.0);
        assert_eq!(cmd.request_id, 2);
    }

    #[test]
    fn test_reset_counter() {
        let mut d = dialog();
        d.request(VehicleCommandKind::ExecManeuver, None, 0, 100.0);
        d.reset_counter();
        let cmd = d.request(VehicleCommandKind::ExecManeuver, None, 0, 200.0);
        assert_eq!(cmd.request_id, 0);
    }
}
