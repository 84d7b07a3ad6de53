//! Engine State Machine
//!
//! The top-level controller of the plan engine. Owns the plan database
//! gateway, the plan model, the vehicle dialog and the memento handler,
//! consumes every bus message the engine cares about, and publishes
//! `PlanControlState` (periodically and on change), plan-control replies,
//! vehicle commands and entity health.
//!
//! The engine is driven entirely through [`consume`](PlanEngine::consume)
//! and [`tick`](PlanEngine::tick), both taking the bus and a monotonic
//! clock value by argument. It never blocks, never spawns and holds no
//! handle to its owner, so every scenario can be driven from an in-memory
//! bus fixture.
//!
//! ## States
//!
//! ```text
//!  BOOT ──service──▶ READY ──start──▶ START_ACTIV ─▶ ACTIVATING
//!    ▲                 ▲                  │              │
//!    │                 │                  ▼              │
//!  BLOCKED ◀──silence──┴── STOPPING ◀─ START_EXEC ◀──────┘
//!                              ▲            │
//!                              └─ EXECUTING ◀┘
//! ```
//!
//! Externally only `{Blocked, Ready, Initializing, Executing}` are
//! visible; the mapping is in [`EngineState::external`].

pub mod dialog;
pub mod filler;
pub mod memento;
pub mod run;

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::defaults::{
    MAX_QUEUED_REQUESTS, VEHICLE_STATE_TIMEOUT_S,
};
use crate::config::EngineConfig;
use crate::db::{DbError, PlanDatabase};
use crate::messages::{
    ActivationState, EntityActivationState, EntityState, EntityStateKind, EstimatedState,
    FuelLevel, Header, LastOutcome, LoggingControl, LoggingControlOp, Maneuver,
    ManeuverControlState, Memento, Message, MessageType, OpMode, PlanArg, PlanControl,
    PlanControlOp, PlanControlState, PlanDb, PlanManeuver, PlanMemento, PlanSpecification,
    PlanState, PowerOp, PowerOperation, RegisterManeuver, VehicleCommand, VehicleCommandKind,
    VehicleState, ADDR_ANY, ENT_ANY, FLG_CALIBRATE,
};
use crate::plan::PlanRuntime;

use dialog::{DialogReply, VehicleDialog};
use filler::calibration_filler;
use memento::MementoHandler;

// ============================================================================
// States
// ============================================================================

/// Internal machine state. Strictly richer than the published
/// [`PlanState`]; every external transition corresponds to one or more
/// internal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for the first vehicle state report.
    Boot,
    /// Idle, accepting requests.
    Ready,
    /// A stop command is on its way to the vehicle.
    Stopping,
    /// Plan accepted; checking required entity activation.
    StartActivation,
    /// Waiting for required entities to activate.
    Activating,
    /// Dispatching calibration and the first maneuver.
    StartExecution,
    /// Plan under execution.
    Executing,
    /// Vehicle unavailable (silent, errored or booting).
    Blocked,
}

impl EngineState {
    /// The externally published state this internal state maps to.
    pub fn external(self) -> PlanState {
        match self {
            EngineState::Boot | EngineState::Blocked => PlanState::Blocked,
            EngineState::Ready | EngineState::Stopping => PlanState::Ready,
            EngineState::StartActivation | EngineState::Activating | EngineState::StartExecution => {
                PlanState::Initializing
            }
            EngineState::Executing => PlanState::Executing,
        }
    }

    /// A plan is being initialized or executed.
    fn is_active(self) -> bool {
        matches!(
            self,
            EngineState::StartActivation
                | EngineState::Activating
                | EngineState::StartExecution
                | EngineState::Executing
        )
    }

    fn is_initializing(self) -> bool {
        matches!(
            self,
            EngineState::StartActivation | EngineState::Activating | EngineState::StartExecution
        )
    }
}

/// What the in-flight vehicle command, or the condition being waited on,
/// means to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecPhase {
    /// START_CALIBRATION dispatched.
    AwaitCalibStart,
    /// Calibration filler maneuver dispatched.
    AwaitFiller,
    /// Filler running; waiting for the calibration countdown and mode.
    Calibrating,
    /// STOP_CALIBRATION dispatched after calibration completed.
    AwaitCalibStop,
    /// First real maneuver dispatched.
    AwaitStartManeuver,
    /// Successor maneuver dispatched mid-plan.
    AwaitNextManeuver,
    /// STOP_MANEUVER dispatched.
    AwaitStop,
}

/// The operator request currently being serviced.
#[derive(Debug, Clone)]
struct PendingRequest {
    request_id: u16,
    op: PlanControlOp,
    plan_id: String,
    /// Source system/entity the reply goes back to.
    reply_dst: (u16, u8),
}

impl PendingRequest {
    fn from_request(pc: &PlanControl) -> Self {
        Self {
            request_id: pc.request_id,
            op: pc.op,
            plan_id: pc.plan_id.clone(),
            reply_dst: (pc.header.src, pc.header.src_ent),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct PlanEngine {
    cfg: EngineConfig,
    state: EngineState,
    phase: Option<ExecPhase>,

    db: PlanDatabase,
    dialog: VehicleDialog,
    mementos: MementoHandler,
    plan: PlanRuntime,

    /// Maneuver kinds the vehicle registered support for.
    supported_maneuvers: HashSet<String>,
    /// Entity id -> label, from EntityInfo announcements.
    entity_labels: HashMap<u8, String>,
    /// Label -> last reported activation state.
    entity_activation: HashMap<String, ActivationState>,
    imu_enabled: bool,

    last_vehicle_state_at: Option<f64>,
    last_estimated: Option<EstimatedState>,

    current_request: Option<PendingRequest>,
    /// Last request that started or stopped a plan; unsolicited failures
    /// reference it.
    last_request: Option<PendingRequest>,
    queue: VecDeque<PlanControl>,
    /// Monotonic per-start counter pairing vehicle mementos with plans.
    plan_ref: u32,
    last_outcome: LastOutcome,
    /// CALIBRATE requested and enabled for the current start.
    calibrate: bool,
    /// Maneuver id awaiting its EXEC_MANEUVER acceptance.
    pending_exec_id: Option<String>,

    last_report_at: f64,
    entity_state: EntityStateKind,
    entity_state_desc: String,
    db_failed: bool,
    powering_down: bool,
}

impl PlanEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        let db = PlanDatabase::new(&cfg.db.data_dir);
        let dialog = VehicleDialog::new(cfg.identity.clone());
        let plan = PlanRuntime::new(&cfg.engine, cfg.fuel.clone());
        Self {
            cfg,
            state: EngineState::Boot,
            phase: None,
            db,
            dialog,
            mementos: MementoHandler::new(),
            plan,
            supported_maneuvers: HashSet::new(),
            entity_labels: HashMap::new(),
            entity_activation: HashMap::new(),
            imu_enabled: false,
            last_vehicle_state_at: None,
            last_estimated: None,
            current_request: None,
            last_request: None,
            queue: VecDeque::new(),
            plan_ref: 0,
            last_outcome: LastOutcome::None,
            calibrate: false,
            pending_exec_id: None,
            last_report_at: 0.0,
            entity_state: EntityStateKind::Boot,
            entity_state_desc: "initializing".to_string(),
            db_failed: false,
            powering_down: false,
        }
    }

    /// Open the plan database and publish the initial status. A database
    /// failure degrades the engine instead of aborting it: the vehicle
    /// must never lose its plan engine to a bad flash sector.
    pub fn initialize(&mut self, bus: &mut dyn Bus, now: f64) {
        match self.db.open() {
            Ok(()) => self.set_entity_state(EntityStateKind::Normal, "active", bus, now),
            Err(e) => self.fail_db(&e, bus, now),
        }
        self.report(bus, now);
    }

    /// Flush state on shutdown.
    pub fn shutdown(&mut self) {
        self.db.close();
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn published_state(&self) -> PlanState {
        self.state.external()
    }

    /// Seconds until the engine needs a tick even if the bus stays
    /// silent: the next periodic report, reply deadline or watchdog.
    pub fn seconds_to_deadline(&self, now: f64) -> f64 {
        let mut next = self.report_period() - (now - self.last_report_at);
        if let Some(pending) = self.dialog.in_flight() {
            next = next.min(pending.deadline - now);
        }
        if let Some(t) = self.last_vehicle_state_at {
            next = next.min(t + VEHICLE_STATE_TIMEOUT_S - now);
        }
        next.max(0.0)
    }

    fn report_period(&self) -> f64 {
        1.0 / self.cfg.engine.state_report_hz
    }

    // ========================================================================
    // Message intake
    // ========================================================================

    /// Feed one bus message into the state machine. Messages are consumed
    /// by value; nothing is retained by reference.
    pub fn consume(&mut self, msg: Message, bus: &mut dyn Bus, now: f64) {
        match msg {
            Message::PlanControl(pc) => self.on_plan_control(pc, bus, now),
            Message::VehicleCommand(vc) => self.on_vehicle_command(&vc, bus, now),
            Message::VehicleState(vs) => self.on_vehicle_state(&vs, bus, now),
            Message::ManeuverControlState(mcs) => self.on_maneuver_control_state(&mcs),
            Message::EstimatedState(es) => self.last_estimated = Some(es),
            Message::FuelLevel(fl) => self.on_fuel_level(&fl),
            Message::EntityInfo(ei) => {
                self.entity_labels.insert(ei.id, ei.label);
            }
            Message::EntityActivationState(eas) => self.on_entity_activation(&eas, bus, now),
            Message::Memento(m) => self.on_memento(&m, bus, now),
            Message::PlanDb(req) => self.on_plan_db(&req, bus, now),
            Message::PowerOperation(po) => self.on_power_operation(&po, bus, now),
            Message::RegisterManeuver(rm) => self.on_register_maneuver(rm),
            // Our own publications looping back
            Message::PlanControlState(_) | Message::EntityState(_) | Message::LoggingControl(_) => {}
        }
    }

    /// Re-evaluate timers: reply deadline, vehicle-state watchdog,
    /// calibration countdown, periodic reporting. Called by the main loop
    /// after each bus wait.
    pub fn tick(&mut self, bus: &mut dyn Bus, now: f64) {
        if self.dialog.pending() && self.dialog.timed_out(now) {
            self.on_reply_timeout(bus, now);
        }
        self.check_vehicle_watchdog(bus, now);
        self.check_calibration(bus, now);
        if now - self.last_report_at >= self.report_period() {
            self.report(bus, now);
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn out_header(&self, now: f64) -> Header {
        Header {
            src: self.cfg.identity.system_id,
            src_ent: self.cfg.identity.entity_id,
            dst: ADDR_ANY,
            dst_ent: ENT_ANY,
            timestamp: now,
        }
    }

    /// Publish the current `PlanControlState`.
    fn report(&mut self, bus: &mut dyn Bus, now: f64) {
        self.last_report_at = now;
        let active = self.state.is_active() || self.state == EngineState::Stopping;
        let msg = PlanControlState {
            header: self.out_header(now),
            state: self.state.external(),
            plan_id: if active {
                self.plan.plan_id().to_string()
            } else {
                String::new()
            },
            plan_eta: if active { self.plan.get_eta() } else { -1 },
            plan_progress: if active { self.plan.progress_pct() } else { -1.0 },
            man_id: if active {
                self.plan.get_current_id().unwrap_or("").to_string()
            } else {
                String::new()
            },
            last_outcome: self.last_outcome,
        };
        bus.dispatch(Message::PlanControlState(msg));
    }

    /// Change the internal state, publishing the external state on edge.
    fn set_state(&mut self, new: EngineState, bus: &mut dyn Bus, now: f64) {
        if new == self.state {
            return;
        }
        let old_external = self.state.external();
        info!(from = ?self.state, to = ?new, "Engine state change");
        self.state = new;
        if new == EngineState::Ready {
            // Deterministic request-counter reset on every drop to READY
            self.dialog.reset_counter();
            self.phase = None;
        }
        if new.external() != old_external {
            self.report(bus, now);
        }
    }

    fn set_entity_state(
        &mut self,
        kind: EntityStateKind,
        description: &str,
        bus: &mut dyn Bus,
        now: f64,
    ) {
        if kind == self.entity_state && description == self.entity_state_desc {
            return;
        }
        self.entity_state = kind;
        self.entity_state_desc = description.to_string();
        bus.dispatch(Message::EntityState(EntityState {
            header: self.out_header(now),
            state: kind,
            description: description.to_string(),
        }));
    }

    /// Reply to a plan-control request.
    fn answer(
        &mut self,
        to: &PendingRequest,
        outcome: MessageType,
        info: &str,
        bus: &mut dyn Bus,
        now: f64,
    ) {
        let mut header = self.out_header(now);
        header.dst = to.reply_dst.0;
        header.dst_ent = to.reply_dst.1;
        if outcome == MessageType::Failure {
            warn!(op = %to.op, plan_id = %to.plan_id, info, "Plan control request failed");
        }
        bus.dispatch(Message::PlanControl(PlanControl {
            header,
            ctype: outcome,
            op: to.op,
            request_id: to.request_id,
            plan_id: to.plan_id.clone(),
            flags: 0,
            arg: None,
            info: info.to_string(),
        }));
    }

    /// Answer the request currently being serviced, if any, and retire it.
    fn answer_current(&mut self, outcome: MessageType, info: &str, bus: &mut dyn Bus, now: f64) {
        if let Some(req) = self.current_request.take() {
            self.answer(&req, outcome, info, bus, now);
        }
    }

    fn send_vehicle_command(
        &mut self,
        command: VehicleCommandKind,
        maneuver: Option<PlanManeuver>,
        calib_time: u16,
        bus: &mut dyn Bus,
        now: f64,
    ) {
        let mut cmd = self.dialog.request(command, maneuver, calib_time, now);
        cmd.header.timestamp = now;
        bus.dispatch(Message::VehicleCommand(cmd));
    }

    // ========================================================================
    // Plan control requests
    // ========================================================================

    fn on_plan_control(&mut self, pc: PlanControl, bus: &mut dyn Bus, now: f64) {
        if pc.ctype != MessageType::Request
            || !pc
                .header
                .addressed_to(self.cfg.identity.system_id, self.cfg.identity.entity_id)
        {
            return;
        }
        // Serialize behind the in-flight vehicle command
        if self.dialog.pending() {
            if self.queue.len() >= MAX_QUEUED_REQUESTS {
                let req = PendingRequest::from_request(&pc);
                self.answer(&req, MessageType::Failure, "request queue full", bus, now);
                return;
            }
            debug!(op = %pc.op, plan_id = %pc.plan_id, "Queueing request behind in-flight vehicle command");
            self.queue.push_back(pc);
            return;
        }
        self.process_request(pc, bus, now);
    }

    fn process_request(&mut self, pc: PlanControl, bus: &mut dyn Bus, now: f64) {
        debug!(op = %pc.op, plan_id = %pc.plan_id, request_id = pc.request_id, "Processing request");
        let req = PendingRequest::from_request(&pc);
        if self.db_failed || self.powering_down {
            let info = if self.powering_down {
                "engine is powering down"
            } else {
                "plan database is in error"
            };
            // STOP must still work: a degraded database is no reason to
            // keep the vehicle driving.
            if pc.op != PlanControlOp::Stop {
                self.answer(&req, MessageType::Failure, info, bus, now);
                return;
            }
        }
        match pc.op {
            PlanControlOp::Start => self.handle_start(pc, bus, now),
            PlanControlOp::Stop => self.handle_stop(pc, bus, now),
            PlanControlOp::Load => self.handle_load(pc, bus, now),
            PlanControlOp::Get => self.handle_get(pc, bus, now),
        }
    }

    fn handle_start(&mut self, pc: PlanControl, bus: &mut dyn Bus, now: f64) {
        let req = PendingRequest::from_request(&pc);
        if matches!(self.state, EngineState::Boot | EngineState::Blocked) {
            self.answer(
                &req,
                MessageType::Failure,
                "vehicle is not available for plan execution",
                bus,
                now,
            );
            return;
        }

        // A new plan supersedes the running one: stop bookkeeping only, no
        // STOP_MANEUVER, since the vehicle is about to get a new maneuver.
        let superseded = self.state.is_active();
        if superseded {
            info!(old = %self.plan.plan_id(), new = %pc.plan_id, "Start supersedes running plan");
            // An initialization still awaiting its reply is over now
            self.answer_current(
                MessageType::Failure,
                "superseded by a new start request",
                bus,
                now,
            );
            self.plan.plan_stopped();
        }

        match self.load_plan(&pc, bus, now) {
            Ok(()) => {}
            Err(cause) => {
                self.plan.clear();
                self.last_outcome = LastOutcome::Failure;
                self.answer(&req, MessageType::Failure, &cause, bus, now);
                // Every failed start stops the vehicle, superseded plan or
                // not: after a refused start nothing may keep maneuvering.
                self.last_request = Some(req);
                self.send_vehicle_command(VehicleCommandKind::StopManeuver, None, 0, bus, now);
                self.phase = Some(ExecPhase::AwaitStop);
                self.set_state(EngineState::Stopping, bus, now);
                return;
            }
        }

        self.calibrate =
            pc.flags & FLG_CALIBRATE != 0 && self.cfg.engine.perform_calibration;
        self.current_request = Some(req.clone());
        self.last_request = Some(req);
        self.plan_ref = self.plan_ref.wrapping_add(1);
        self.mementos.record(self.plan_ref, self.plan.plan_id());
        self.plan.plan_started();
        self.last_outcome = LastOutcome::None;

        let log_name = self.plan.plan_id().to_string();
        bus.dispatch(Message::LoggingControl(LoggingControl {
            header: self.out_header(now),
            op: LoggingControlOp::RequestStart,
            name: log_name,
        }));

        self.set_state(EngineState::StartActivation, bus, now);
        self.proceed_activation(bus, now);
    }

    fn handle_stop(&mut self, pc: PlanControl, bus: &mut dyn Bus, now: f64) {
        let req = PendingRequest::from_request(&pc);
        if !self.state.is_active() {
            self.answer(&req, MessageType::Failure, "no plan running", bus, now);
            return;
        }
        // An initialization still awaiting its reply is over now
        self.answer_current(MessageType::Failure, "stopped by operator", bus, now);
        self.plan.plan_stopped();
        self.last_outcome = LastOutcome::Failure;
        self.current_request = Some(req.clone());
        self.last_request = Some(req);
        self.send_vehicle_command(VehicleCommandKind::StopManeuver, None, 0, bus, now);
        self.phase = Some(ExecPhase::AwaitStop);
        self.set_state(EngineState::Stopping, bus, now);
    }

    fn handle_load(&mut self, pc: PlanControl, bus: &mut dyn Bus, now: f64) {
        let req = PendingRequest::from_request(&pc);
        // Deliberate asymmetry with START: loading is read-only metadata
        // and is rejected while a plan is active instead of superseding it.
        if self.state.is_active() || self.state == EngineState::Stopping {
            self.answer(&req, MessageType::Failure, "cannot load plan now", bus, now);
            return;
        }
        match self.load_plan(&pc, bus, now) {
            Ok(()) => {
                let info = format!("plan '{}' loaded", self.plan.plan_id());
                self.answer(&req, MessageType::Success, &info, bus, now);
            }
            Err(cause) => {
                self.plan.clear();
                self.answer(&req, MessageType::Failure, &cause, bus, now);
            }
        }
    }

    fn handle_get(&mut self, pc: PlanControl, bus: &mut dyn Bus, now: f64) {
        let req = PendingRequest::from_request(&pc);
        let Some(spec) = self.plan.spec().cloned() else {
            self.answer(&req, MessageType::Failure, "no plan loaded", bus, now);
            return;
        };
        let mut header = self.out_header(now);
        header.dst = req.reply_dst.0;
        header.dst_ent = req.reply_dst.1;
        bus.dispatch(Message::PlanControl(PlanControl {
            header,
            ctype: MessageType::Success,
            op: PlanControlOp::Get,
            request_id: req.request_id,
            plan_id: spec.plan_id.clone(),
            flags: 0,
            arg: Some(PlanArg::Spec(spec)),
            info: String::new(),
        }));
    }

    // ========================================================================
    // Plan loading
    // ========================================================================

    /// Resolve the request argument to a specification and parse it into
    /// the plan model.
    fn load_plan(&mut self, pc: &PlanControl, bus: &mut dyn Bus, now: f64) -> Result<(), String> {
        let spec = self.resolve_spec(pc, bus, now)?;
        let known_labels: HashSet<String> = self.entity_labels.values().cloned().collect();
        let stats = self
            .plan
            .parse(
                spec,
                &self.supported_maneuvers,
                &known_labels,
                self.imu_enabled,
                self.last_estimated.as_ref(),
            )
            .map_err(|e| e.to_string())?;
        if let Some(fuel) = stats.fuel {
            if !fuel.sufficient {
                warn!(
                    plan_id = %pc.plan_id,
                    predicted_remaining_pct = fuel.predicted_remaining_pct,
                    "Fuel forecast insufficient for plan"
                );
            }
        }
        Ok(())
    }

    fn resolve_spec(
        &mut self,
        pc: &PlanControl,
        bus: &mut dyn Bus,
        now: f64,
    ) -> Result<PlanSpecification, String> {
        match &pc.arg {
            Some(PlanArg::Spec(spec)) => {
                self.db_checked(|db| db.store_plan(spec), bus, now)?;
                Ok(spec.clone())
            }
            Some(PlanArg::Memento(m)) => {
                let m = m.clone();
                self.resolve_memento(&m, bus, now)
            }
            Some(PlanArg::QuickManeuver(man)) => {
                if pc.plan_id.is_empty() {
                    return Err("quick plan requires a plan id".to_string());
                }
                let spec = quick_plan(&pc.plan_id, man.clone());
                self.db_checked(|db| db.store_plan(&spec), bus, now)?;
                Ok(spec)
            }
            None => {
                if let Some(spec) = self.db_checked(|db| db.lookup_plan(&pc.plan_id), bus, now)? {
                    return Ok(spec);
                }
                let memento = self
                    .db_checked(|db| db.lookup_memento(&pc.plan_id), bus, now)?
                    .ok_or_else(|| format!("undefined plan '{}'", pc.plan_id))?;
                self.resolve_memento(&memento, bus, now)
            }
        }
    }

    /// Resolve a memento to its plan with the start maneuver overridden
    /// and the resume token injected.
    fn resolve_memento(
        &mut self,
        m: &PlanMemento,
        bus: &mut dyn Bus,
        now: f64,
    ) -> Result<PlanSpecification, String> {
        let mut spec = self
            .db_checked(|db| db.lookup_plan(&m.plan_id), bus, now)?
            .ok_or_else(|| format!("memento '{}' references unknown plan '{}'", m.id, m.plan_id))?;
        let target = spec
            .maneuvers
            .iter_mut()
            .find(|pm| pm.maneuver_id == m.maneuver_id)
            .ok_or_else(|| {
                format!(
                    "memento '{}' references unknown maneuver '{}'",
                    m.id, m.maneuver_id
                )
            })?;
        target.memento = Some(m.memento.clone());
        spec.start_man_id = m.maneuver_id.clone();
        self.db_checked(|db| db.store_memento(m), bus, now)?;
        info!(plan_id = %m.plan_id, maneuver_id = %m.maneuver_id, "Resuming plan from memento");
        Ok(spec)
    }

    /// Run a database operation, degrading the engine on failure and
    /// recovering it on the next success.
    fn db_checked<T>(
        &mut self,
        op: impl FnOnce(&PlanDatabase) -> Result<T, DbError>,
        bus: &mut dyn Bus,
        now: f64,
    ) -> Result<T, String> {
        match op(&self.db) {
            Ok(value) => {
                self.recover_db(bus, now);
                Ok(value)
            }
            Err(e) => {
                self.fail_db(&e, bus, now);
                Err(e.to_string())
            }
        }
    }

    fn fail_db(&mut self, e: &DbError, bus: &mut dyn Bus, now: f64) {
        warn!(error = %e, "Plan database failure");
        self.db_failed = true;
        self.set_entity_state(EntityStateKind::Error, "database failure", bus, now);
    }

    fn recover_db(&mut self, bus: &mut dyn Bus, now: f64) {
        if self.db_failed && !self.powering_down {
            info!("Plan database recovered");
            self.db_failed = false;
            self.set_entity_state(EntityStateKind::Normal, "active", bus, now);
        }
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Check required entities; enter execution when all are active.
    fn proceed_activation(&mut self, bus: &mut dyn Bus, now: f64) {
        let missing: Vec<String> = self
            .plan
            .required_entities()
            .iter()
            .filter(|label| {
                self.entity_activation.get(label.as_str()) != Some(&ActivationState::Active)
            })
            .cloned()
            .collect();
        if missing.is_empty() {
            self.enter_start_execution(bus, now);
        } else {
            debug!(?missing, "Waiting for required entities to activate");
            self.set_state(EngineState::Activating, bus, now);
        }
    }

    fn enter_start_execution(&mut self, bus: &mut dyn Bus, now: f64) {
        self.set_state(EngineState::StartExecution, bus, now);
        if self.calibrate {
            let calib_time = self.plan.get_estimated_calibration_time().round() as u16;
            self.send_vehicle_command(
                VehicleCommandKind::StartCalibration,
                None,
                calib_time,
                bus,
                now,
            );
            self.phase = Some(ExecPhase::AwaitCalibStart);
        } else {
            self.dispatch_first_maneuver(bus, now);
        }
    }

    fn dispatch_first_maneuver(&mut self, bus: &mut dyn Bus, now: f64) {
        let Some(start) = self.plan.load_start_maneuver() else {
            // Empty plan: nothing to execute, report success right away
            info!(plan_id = %self.plan.plan_id(), "Plan has no maneuvers, completing immediately");
            self.last_outcome = LastOutcome::Success;
            self.answer_current(MessageType::Success, "empty plan completed", bus, now);
            self.set_state(EngineState::Ready, bus, now);
            return;
        };
        self.pending_exec_id = Some(start.maneuver_id.clone());
        self.send_vehicle_command(VehicleCommandKind::ExecManeuver, Some(start), 0, bus, now);
        self.phase = Some(ExecPhase::AwaitStartManeuver);
    }

    fn on_entity_activation(
        &mut self,
        eas: &EntityActivationState,
        bus: &mut dyn Bus,
        now: f64,
    ) {
        let Some(label) = self.entity_labels.get(&eas.header.src_ent).cloned() else {
            debug!(entity = eas.header.src_ent, "Activation state for unannounced entity");
            return;
        };
        self.entity_activation.insert(label.clone(), eas.state);
        if label == self.cfg.engine.imu_entity_label {
            self.imu_enabled = eas.state == ActivationState::Active;
        }

        if let Err(cause) = self
            .plan
            .on_entity_activation_state(&label, eas.state, &eas.error)
        {
            if self.state.is_initializing() && self.cfg.engine.abort_on_failed_activation {
                self.fail_initialization(&cause, bus, now);
                return;
            }
            warn!(label = %label, cause = %cause, "Entity activation failure (continuing)");
        }

        if matches!(
            self.state,
            EngineState::StartActivation | EngineState::Activating
        ) {
            self.proceed_activation(bus, now);
        }
    }

    // ========================================================================
    // Vehicle replies
    // ========================================================================

    fn on_vehicle_command(&mut self, vc: &VehicleCommand, bus: &mut dyn Bus, now: f64) {
        let Some(reply) = self.dialog.on_reply(vc) else {
            return;
        };
        if matches!(reply, DialogReply::InProgress(_)) {
            debug!(command = %vc.command, "Vehicle still working on command");
            return;
        }
        let Some(phase) = self.phase else {
            debug!(command = %vc.command, "Reply with no phase to apply it to");
            return;
        };
        match (phase, reply) {
            (ExecPhase::AwaitCalibStart, DialogReply::Success(_)) => {
                self.plan.calibration_started(now);
                let filler = calibration_filler(&self.cfg.engine, self.last_estimated.as_ref());
                self.send_vehicle_command(
                    VehicleCommandKind::ExecManeuver,
                    Some(filler),
                    0,
                    bus,
                    now,
                );
                self.phase = Some(ExecPhase::AwaitFiller);
            }
            (ExecPhase::AwaitCalibStart, DialogReply::Failure(_, info)) => {
                self.fail_initialization(&format!("calibration refused: {}", info), bus, now);
            }
            (ExecPhase::AwaitFiller, DialogReply::Success(_)) => {
                // Initiation done: the vehicle accepted the calibration
                // maneuver. The operator gets the reply now; execution
                // follows once the countdown elapses.
                self.phase = Some(ExecPhase::Calibrating);
                let info = self.plan.get_calibration_info(now);
                self.answer_current(MessageType::Success, &info, bus, now);
                self.drain_queue(bus, now);
            }
            (ExecPhase::AwaitFiller, DialogReply::Failure(_, info)) => {
                self.fail_initialization(&format!("calibration maneuver refused: {}", info), bus, now);
            }
            (ExecPhase::AwaitCalibStop, DialogReply::Success(_)) => {
                // STOP_CALIBRATION failures were downgraded in the dialog
                self.dispatch_first_maneuver(bus, now);
                self.drain_queue(bus, now);
            }
            (ExecPhase::AwaitCalibStop, DialogReply::Failure(_, info)) => {
                self.fail_initialization(&format!("failed to stop calibration: {}", info), bus, now);
            }
            (ExecPhase::AwaitStartManeuver, DialogReply::Success(_)) => {
                if let Some(id) = self.pending_exec_id.take() {
                    self.plan.maneuver_started(&id);
                }
                self.phase = None;
                self.answer_current(MessageType::Success, "plan executing", bus, now);
                self.set_state(EngineState::Executing, bus, now);
                self.drain_queue(bus, now);
            }
            (ExecPhase::AwaitStartManeuver, DialogReply::Failure(_, info)) => {
                self.fail_initialization(&format!("maneuver refused: {}", info), bus, now);
            }
            (ExecPhase::AwaitNextManeuver, DialogReply::Success(_)) => {
                if let Some(id) = self.pending_exec_id.take() {
                    self.plan.maneuver_started(&id);
                }
                self.phase = None;
                self.drain_queue(bus, now);
            }
            (ExecPhase::AwaitNextManeuver, DialogReply::Failure(_, info)) => {
                self.fail_execution(&format!("maneuver refused: {}", info), false, bus, now);
            }
            (ExecPhase::AwaitStop, reply) => {
                // The stop exchange is over either way; a refused stop is
                // still surfaced to the operator.
                self.phase = None;
                match reply {
                    DialogReply::Success(_) => {
                        self.answer_current(MessageType::Success, "plan stopped", bus, now);
                    }
                    DialogReply::Failure(_, info) => {
                        let info = format!("stop refused: {}", info);
                        self.answer_current(MessageType::Failure, &info, bus, now);
                    }
                    DialogReply::InProgress(_) => {}
                }
                self.set_state(EngineState::Ready, bus, now);
                self.drain_queue(bus, now);
            }
            (ExecPhase::Calibrating, reply) => {
                debug!(?reply, "Ignoring vehicle reply while calibrating");
            }
            // InProgress returned early above
            (_, DialogReply::InProgress(_)) => {}
        }
    }

    /// The in-flight vehicle command passed its deadline.
    fn on_reply_timeout(&mut self, bus: &mut dyn Bus, now: f64) {
        let command = self
            .dialog
            .in_flight()
            .map(|p| p.command.to_string())
            .unwrap_or_default();
        warn!(command = %command, "Vehicle command reply timeout");
        // Bump the request counter so a late reply can no longer match
        self.dialog.clear();
        self.phase = None;
        self.pending_exec_id = None;
        if self.state.is_active() || self.state == EngineState::Stopping {
            self.plan.plan_stopped();
            self.last_outcome = LastOutcome::Failure;
        }
        let info = format!("vehicle did not reply to {}", command);
        if self.current_request.is_some() {
            self.answer_current(MessageType::Failure, &info, bus, now);
        } else {
            self.emit_unsolicited_failure(&info, bus, now);
        }
        self.set_state(EngineState::Ready, bus, now);
        self.drain_queue(bus, now);
    }

    // ========================================================================
    // Vehicle state
    // ========================================================================

    fn on_vehicle_state(&mut self, vs: &VehicleState, bus: &mut dyn Bus, now: f64) {
        self.last_vehicle_state_at = Some(now);
        self.plan.update_calibration(vs, now);

        match self.state {
            EngineState::Boot | EngineState::Blocked => {
                if vs.op_mode == OpMode::Service {
                    self.set_state(EngineState::Ready, bus, now);
                }
            }
            EngineState::Executing => {
                if matches!(vs.op_mode, OpMode::Error | OpMode::Boot) {
                    let cause = if vs.last_error.is_empty() {
                        format!("vehicle entered {} mode", vs.op_mode)
                    } else {
                        format!("vehicle entered {} mode: {}", vs.op_mode, vs.last_error)
                    };
                    self.fail_execution(&cause, true, bus, now);
                } else if vs.maneuver_done() && self.phase.is_none() && !self.dialog.pending() {
                    self.advance_maneuver(bus, now);
                }
            }
            EngineState::StartActivation | EngineState::Activating => {
                if matches!(vs.op_mode, OpMode::Error | OpMode::Boot) {
                    self.fail_initialization(
                        &format!("vehicle entered {} mode during initialization", vs.op_mode),
                        bus,
                        now,
                    );
                }
            }
            EngineState::StartExecution => {
                // Calibration failure/completion handled in check_calibration
            }
            EngineState::Ready | EngineState::Stopping => {}
        }
        self.check_calibration(bus, now);
    }

    /// Drive the calibration phase: failure aborts initialization, completion
    /// stops the calibration and dispatches the first real maneuver.
    fn check_calibration(&mut self, bus: &mut dyn Bus, now: f64) {
        if self.phase != Some(ExecPhase::Calibrating) {
            return;
        }
        if self.plan.has_calibration_failed() {
            let info = self.plan.get_calibration_info(now);
            self.fail_initialization(&info, bus, now);
            return;
        }
        if self.plan.is_calibration_done(now) && !self.dialog.pending() {
            info!(plan_id = %self.plan.plan_id(), "Calibration done, starting plan");
            self.send_vehicle_command(VehicleCommandKind::StopCalibration, None, 0, bus, now);
            self.phase = Some(ExecPhase::AwaitCalibStop);
        }
    }

    /// The vehicle finished its maneuver: follow the transition graph.
    fn advance_maneuver(&mut self, bus: &mut dyn Bus, now: f64) {
        self.plan.maneuver_done();
        match self.plan.load_next_maneuver() {
            Some(next) => {
                debug!(maneuver_id = %next.maneuver_id, "Dispatching next maneuver");
                self.pending_exec_id = Some(next.maneuver_id.clone());
                self.send_vehicle_command(
                    VehicleCommandKind::ExecManeuver,
                    Some(next),
                    0,
                    bus,
                    now,
                );
                self.phase = Some(ExecPhase::AwaitNextManeuver);
            }
            None => {
                info!(plan_id = %self.plan.plan_id(), "Plan completed");
                self.last_outcome = LastOutcome::Success;
                self.plan.plan_stopped();
                self.send_vehicle_command(VehicleCommandKind::StopManeuver, None, 0, bus, now);
                self.phase = Some(ExecPhase::AwaitStop);
                self.set_state(EngineState::Stopping, bus, now);
            }
        }
    }

    /// Blocks the engine when the vehicle goes silent for longer than the
    /// watchdog allows. An interval of exactly the limit is tolerated.
    fn check_vehicle_watchdog(&mut self, bus: &mut dyn Bus, now: f64) {
        if matches!(self.state, EngineState::Boot | EngineState::Blocked) {
            return;
        }
        let Some(t) = self.last_vehicle_state_at else {
            return;
        };
        if now - t <= VEHICLE_STATE_TIMEOUT_S {
            return;
        }
        warn!(silence_s = now - t, "Vehicle state silence, blocking");
        if self.state.is_active() || self.state == EngineState::Stopping {
            self.plan.plan_stopped();
            self.last_outcome = LastOutcome::Failure;
            let info = "vehicle state timeout";
            if self.current_request.is_some() {
                self.answer_current(MessageType::Failure, info, bus, now);
            } else {
                self.emit_unsolicited_failure(info, bus, now);
            }
        }
        self.dialog.clear();
        self.phase = None;
        self.pending_exec_id = None;
        self.set_state(EngineState::Blocked, bus, now);
        self.drain_queue(bus, now);
    }

    // ========================================================================
    // Failure paths
    // ========================================================================

    /// Abort plan initialization: answer the operator, stop the vehicle,
    /// drop to READY (through STOPPING).
    fn fail_initialization(&mut self, cause: &str, bus: &mut dyn Bus, now: f64) {
        warn!(plan_id = %self.plan.plan_id(), cause, "Plan initialization failed");
        self.last_outcome = LastOutcome::Failure;
        self.plan.plan_stopped();
        self.pending_exec_id = None;
        if self.current_request.is_some() {
            self.answer_current(MessageType::Failure, cause, bus, now);
        } else {
            self.emit_unsolicited_failure(cause, bus, now);
        }
        if self.dialog.pending() {
            // The failure came from somewhere else while a command is in
            // flight; invalidate it before stopping.
            self.dialog.clear();
        }
        self.send_vehicle_command(VehicleCommandKind::StopManeuver, None, 0, bus, now);
        self.phase = Some(ExecPhase::AwaitStop);
        self.set_state(EngineState::Stopping, bus, now);
    }

    /// Abort a plan in execution. `vehicle_lost` routes READY -> BLOCKED
    /// (vehicle errored or rebooted) instead of stopping the maneuver.
    fn fail_execution(&mut self, cause: &str, vehicle_lost: bool, bus: &mut dyn Bus, now: f64) {
        warn!(plan_id = %self.plan.plan_id(), cause, "Plan execution failed");
        self.last_outcome = LastOutcome::Failure;
        self.plan.plan_stopped();
        self.pending_exec_id = None;
        if self.current_request.is_some() {
            self.answer_current(MessageType::Failure, cause, bus, now);
        } else {
            self.emit_unsolicited_failure(cause, bus, now);
        }
        if vehicle_lost {
            self.dialog.clear();
            self.phase = None;
            self.set_state(EngineState::Ready, bus, now);
            self.set_state(EngineState::Blocked, bus, now);
            self.drain_queue(bus, now);
        } else {
            self.send_vehicle_command(VehicleCommandKind::StopManeuver, None, 0, bus, now);
            self.phase = Some(ExecPhase::AwaitStop);
            self.set_state(EngineState::Stopping, bus, now);
        }
    }

    /// Failure with no open request: reference the request that started
    /// the plan so the operator can correlate.
    fn emit_unsolicited_failure(&mut self, cause: &str, bus: &mut dyn Bus, now: f64) {
        if let Some(req) = self.last_request.clone() {
            self.answer(&req, MessageType::Failure, cause, bus, now);
        }
    }

    // ========================================================================
    // Remaining inputs
    // ========================================================================

    fn on_maneuver_control_state(&mut self, mcs: &ManeuverControlState) {
        if self.state == EngineState::Executing {
            self.plan.update_progress(mcs);
        }
    }

    fn on_fuel_level(&mut self, fl: &FuelLevel) {
        self.plan.on_fuel_level(fl);
    }

    fn on_register_maneuver(&mut self, rm: RegisterManeuver) {
        debug!(kind = %rm.kind, "Maneuver kind registered");
        self.supported_maneuvers.insert(rm.kind);
    }

    fn on_memento(&mut self, m: &Memento, bus: &mut dyn Bus, now: f64) {
        let Some(pm) = self.mementos.process(m) else {
            return;
        };
        debug!(id = %pm.id, maneuver_id = %pm.maneuver_id, "Persisting memento");
        let _ = self.db_checked(|db| db.store_memento(&pm), bus, now);
    }

    fn on_plan_db(&mut self, req: &PlanDb, bus: &mut dyn Bus, now: f64) {
        if req.dtype != MessageType::Request
            || !req
                .header
                .addressed_to(self.cfg.identity.system_id, self.cfg.identity.entity_id)
        {
            return;
        }
        let (mut reply, health) = self.db.handle_request(req);
        match health {
            Ok(()) => self.recover_db(bus, now),
            Err(e) => self.fail_db(&e, bus, now),
        }
        let mut header = self.out_header(now);
        header.dst = req.header.src;
        header.dst_ent = req.header.src_ent;
        reply.header = header;
        bus.dispatch(Message::PlanDb(reply));
    }

    fn on_power_operation(&mut self, po: &PowerOperation, bus: &mut dyn Bus, now: f64) {
        match po.op {
            PowerOp::PowerDownInProgress => {
                info!("Power down in progress, closing plan database");
                self.powering_down = true;
                self.db.close();
                self.set_entity_state(EntityStateKind::Error, "power down", bus, now);
            }
            PowerOp::PowerDownAborted => {
                info!("Power down aborted, reopening plan database");
                self.powering_down = false;
                match self.db.open() {
                    Ok(()) => {
                        self.db_failed = false;
                        self.set_entity_state(EntityStateKind::Normal, "active", bus, now);
                    }
                    Err(e) => self.fail_db(&e, bus, now),
                }
            }
        }
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Service queued requests in arrival order until one of them puts a
    /// new vehicle command in flight.
    fn drain_queue(&mut self, bus: &mut dyn Bus, now: f64) {
        while !self.dialog.pending() {
            let Some(pc) = self.queue.pop_front() else {
                return;
            };
            self.process_request(pc, bus, now);
        }
    }
}

/// Wrap a bare maneuver into a single-maneuver plan named after the
/// request's plan id.
fn quick_plan(plan_id: &str, data: Maneuver) -> PlanSpecification {
    PlanSpecification {
        plan_id: plan_id.to_string(),
        description: "quick plan".to_string(),
        start_man_id: plan_id.to_string(),
        maneuvers: vec![PlanManeuver {
            maneuver_id: plan_id.to_string(),
            data,
            memento: None,
        }],
        transitions: Vec::new(),
        required_entities: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;
    use crate::messages::SpeedUnits;

    fn goto(lon_deg: f64) -> Maneuver {
        Maneuver::Goto {
            lat: 0.0,
            lon: lon_deg.to_radians(),
            z: 2.0,
            speed: 1.5,
            speed_units: SpeedUnits::MetersPerSecond,
        }
    }

    #[test]
    fn test_quick_plan_shape() {
        let spec = quick_plan("dive-now", goto(0.01));
        assert_eq!(spec.plan_id, "dive-now");
        assert_eq!(spec.start_man_id, "dive-now");
        assert_eq!(spec.maneuvers.len(), 1);
        assert!(spec.transitions.is_empty());
    }

    #[test]
    fn test_external_mapping() {
        assert_eq!(EngineState::Boot.external(), PlanState::Blocked);
        assert_eq!(EngineState::Blocked.external(), PlanState::Blocked);
        assert_eq!(EngineState::Ready.external(), PlanState::Ready);
        assert_eq!(EngineState::Stopping.external(), PlanState::Ready);
        assert_eq!(EngineState::StartActivation.external(), PlanState::Initializing);
        assert_eq!(EngineState::Activating.external(), PlanState::Initializing);
        assert_eq!(EngineState::StartExecution.external(), PlanState::Initializing);
        assert_eq!(EngineState::Executing.external(), PlanState::Executing);
    }

    #[test]
    fn test_boot_goes_ready_on_service() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = EngineConfig::default();
        cfg.db.data_dir = dir.path().to_path_buf();
        let mut engine = PlanEngine::new(cfg);
        let mut bus = RecordingBus::new();
        engine.initialize(&mut bus, 0.0);
        assert_eq!(engine.state(), EngineState::Boot);

        let vs = VehicleState {
            header: Header::default(),
            op_mode: OpMode::Service,
            flags: 0,
            maneuver_eta: 0,
            last_error: String::new(),
        };
        engine.consume(Message::VehicleState(vs), &mut bus, 1.0);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.published_state(), PlanState::Ready);
    }
}
