//! Plan Model
//!
//! Owns the plan under execution: the validated maneuver graph, the
//! parse-time statistics (distance, duration, fuel forecast), execution
//! progress, and calibration supervision. The model has no handle to the
//! bus or the engine; everything it needs (clock values, telemetry,
//! vehicle capabilities) comes in by argument, so it is independently
//! testable.

pub mod calibration;
pub mod fuel;
pub mod graph;
pub mod progress;

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use crate::config::{EngineSection, FuelSection};
use crate::messages::{
    ActivationState, EstimatedState, FuelLevel, ManeuverControlState, PlanManeuver,
    PlanSpecification, VehicleState,
};

use calibration::CalibrationSupervisor;
use fuel::{FuelForecast, FuelPredictor};
use graph::PlanGraph;
use progress::{estimate_chain, ProgressTracker};

/// Why a plan specification was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("duplicate maneuver id '{0}'")]
    DuplicateManeuver(String),

    #[error("start maneuver '{0}' does not exist")]
    UnknownStartManeuver(String),

    #[error("transition references unknown maneuver '{0}'")]
    UnknownTransitionEndpoint(String),

    #[error("maneuver '{0}' is unreachable from the start maneuver")]
    UnreachableManeuver(String),

    #[error("unknown guard '{guard}' on transition from '{source_id}'")]
    UnknownGuard { source_id: String, guard: String },

    #[error("maneuver '{id}' has unsupported kind '{kind}'")]
    UnsupportedManeuver { id: String, kind: String },

    #[error("required entity '{0}' is not known to the vehicle")]
    UnknownEntity(String),
}

/// Statistics derived once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStatistics {
    /// Total travel distance over the execution chain (meters).
    pub total_distance_m: f64,
    /// Total estimated duration; `None` when any maneuver's duration is
    /// unknown.
    pub total_duration_s: Option<f64>,
    pub maneuver_count: usize,
    /// Fuel forecast; `None` when prediction is disabled or no fuel level
    /// has been observed yet.
    pub fuel: Option<FuelForecast>,
}

/// The plan under execution and everything derived from it.
pub struct PlanRuntime {
    spec: Option<PlanSpecification>,
    graph: PlanGraph,
    stats: Option<PlanStatistics>,
    progress: ProgressTracker,
    fuel: FuelPredictor,
    calibration: CalibrationSupervisor,
    compute_progress: bool,
    current_id: Option<String>,
    done: bool,
}

impl PlanRuntime {
    pub fn new(engine_cfg: &EngineSection, fuel_cfg: FuelSection) -> Self {
        Self {
            spec: None,
            graph: PlanGraph::default(),
            stats: None,
            progress: ProgressTracker::default(),
            fuel: FuelPredictor::new(fuel_cfg, engine_cfg.fuel_prediction),
            calibration: CalibrationSupervisor::new(engine_cfg.minimum_calibration_time_s),
            compute_progress: engine_cfg.compute_progress,
            current_id: None,
            done: false,
        }
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Validate a specification and make it the current plan.
    ///
    /// Fails when the graph is malformed, a maneuver kind is not supported
    /// by the vehicle, or a required entity label is unknown. On failure
    /// the model is cleared.
    pub fn parse(
        &mut self,
        spec: PlanSpecification,
        supported_maneuvers: &HashSet<String>,
        known_entities: &HashSet<String>,
        imu_enabled: bool,
        current_state: Option<&EstimatedState>,
    ) -> Result<PlanStatistics, ParseError> {
        let result = self.try_parse(
            spec,
            supported_maneuvers,
            known_entities,
            imu_enabled,
            current_state,
        );
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn try_parse(
        &mut self,
        spec: PlanSpecification,
        supported_maneuvers: &HashSet<String>,
        known_entities: &HashSet<String>,
        imu_enabled: bool,
        current_state: Option<&EstimatedState>,
    ) -> Result<PlanStatistics, ParseError> {
        let graph = PlanGraph::build(&spec)?;

        for pm in graph.maneuvers() {
            let kind = pm.data.kind();
            if !supported_maneuvers.contains(kind) {
                return Err(ParseError::UnsupportedManeuver {
                    id: pm.maneuver_id.clone(),
                    kind: kind.to_string(),
                });
            }
        }
        for label in &spec.required_entities {
            if !known_entities.contains(label) {
                return Err(ParseError::UnknownEntity(label.clone()));
            }
        }

        let origin = current_state.map(|es| (es.lat, es.lon));
        let estimates = estimate_chain(&graph.execution_chain(), origin);
        let total_distance_m = estimates.iter().map(|e| e.distance_m).sum();
        let fuel = self.fuel.forecast(&estimates, imu_enabled);
        let progress = ProgressTracker::new(self.compute_progress, estimates);

        let stats = PlanStatistics {
            total_distance_m,
            total_duration_s: progress.total_duration(),
            maneuver_count: graph.len(),
            fuel,
        };
        debug!(
            plan_id = %spec.plan_id,
            maneuvers = stats.maneuver_count,
            distance_m = stats.total_distance_m,
            duration_s = ?stats.total_duration_s,
            "Plan parsed"
        );

        self.graph = graph;
        self.spec = Some(spec);
        self.progress = progress;
        self.stats = Some(stats.clone());
        self.current_id = None;
        self.done = false;
        Ok(stats)
    }

    /// Drop the current plan and everything derived from it. Fuel level
    /// observations are kept: they describe the vehicle, not the plan.
    pub fn clear(&mut self) {
        self.spec = None;
        self.graph = PlanGraph::default();
        self.stats = None;
        self.progress = ProgressTracker::default();
        self.calibration.reset();
        self.current_id = None;
        self.done = false;
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// The maneuver execution starts at, or `None` for an empty plan.
    pub fn load_start_maneuver(&self) -> Option<PlanManeuver> {
        self.graph.start_maneuver().cloned()
    }

    /// Successor of the just-finished maneuver per the transition graph,
    /// or `None` when the plan is done (which marks the model done).
    pub fn load_next_maneuver(&mut self) -> Option<PlanManeuver> {
        let current = self.current_id.clone()?;
        match self.graph.next_after(&current) {
            Some(pm) => Some(pm.clone()),
            None => {
                self.done = true;
                None
            }
        }
    }

    pub fn maneuver_started(&mut self, maneuver_id: &str) {
        self.current_id = Some(maneuver_id.to_string());
        self.progress.maneuver_started(maneuver_id);
    }

    pub fn maneuver_done(&mut self) {
        self.progress.maneuver_done();
    }

    pub fn plan_started(&mut self) {
        self.done = false;
        self.current_id = None;
        self.progress.plan_started();
    }

    pub fn plan_stopped(&mut self) {
        self.calibration.reset();
        self.current_id = None;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn get_current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn has_plan(&self) -> bool {
        self.spec.is_some()
    }

    pub fn spec(&self) -> Option<&PlanSpecification> {
        self.spec.as_ref()
    }

    pub fn plan_id(&self) -> &str {
        self.spec.as_ref().map_or("", |s| s.plan_id.as_str())
    }

    pub fn statistics(&self) -> Option<&PlanStatistics> {
        self.stats.as_ref()
    }

    /// Entity labels the current plan requires active.
    pub fn required_entities(&self) -> &[String] {
        self.spec
            .as_ref()
            .map_or(&[], |s| s.required_entities.as_slice())
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Fold a maneuver controller report into plan progress. Returns -1
    /// when progress is disabled or insufficient data exists.
    pub fn update_progress(&mut self, mcs: &ManeuverControlState) -> f32 {
        self.progress.update(mcs)
    }

    pub fn progress_pct(&mut self) -> f32 {
        self.progress.progress()
    }

    /// Estimated seconds to plan completion, -1 when unknown.
    pub fn get_eta(&self) -> i32 {
        self.progress.eta()
    }

    // ========================================================================
    // Calibration
    // ========================================================================

    pub fn calibration_started(&mut self, now: f64) {
        self.calibration.start(now);
    }

    pub fn update_calibration(&mut self, vs: &VehicleState, now: f64) {
        self.calibration.update(vs, now);
    }

    pub fn is_calibration_done(&self, now: f64) -> bool {
        self.calibration.is_done(now)
    }

    pub fn is_calibration_in_progress(&self) -> bool {
        self.calibration.in_progress()
    }

    pub fn has_calibration_failed(&self) -> bool {
        self.calibration.has_failed()
    }

    pub fn get_calibration_info(&self, now: f64) -> String {
        self.calibration.info(now)
    }

    pub fn get_estimated_calibration_time(&self) -> f64 {
        self.calibration.estimated_time_s()
    }

    // ========================================================================
    // Entities & fuel
    // ========================================================================

    /// Fold an entity activation report. `Err` only when the plan lists
    /// the label as required and activation reports a hard error.
    pub fn on_entity_activation_state(
        &mut self,
        label: &str,
        state: ActivationState,
        error: &str,
    ) -> Result<(), String> {
        let required = self.required_entities().iter().any(|l| l == label);
        if required && state == ActivationState::ActivationFailed {
            let cause = if error.is_empty() {
                format!("activation of '{}' failed", label)
            } else {
                format!("activation of '{}' failed: {}", label, error)
            };
            return Err(cause);
        }
        Ok(())
    }

    pub fn on_fuel_level(&mut self, fl: &FuelLevel) {
        self.fuel.on_fuel_level(fl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Header, Maneuver, ManeuverState, PlanTransition, SpeedUnits};

    fn goto(id: &str, lon_deg: f64) -> PlanManeuver {
        PlanManeuver {
            maneuver_id: id.to_string(),
            data: Maneuver::Goto {
                lat: 0.0,
                lon: lon_deg.to_radians(),
                z: 2.0,
                speed: 1.5,
                speed_units: SpeedUnits::MetersPerSecond,
            },
            memento: None,
        }
    }

    fn two_goto_spec() -> PlanSpecification {
        PlanSpecification {
            plan_id: "p1".to_string(),
            description: String::new(),
            start_man_id: "A".to_string(),
            maneuvers: vec![goto("A", 0.01), goto("B", 0.02)],
            transitions: vec![PlanTransition {
                source_man: "A".to_string(),
                dest_man: "B".to_string(),
                guard: String::new(),
            }],
            required_entities: Vec::new(),
        }
    }

    fn supported() -> HashSet<String> {
        ["Goto", "Loiter", "StationKeeping", "Idle"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn runtime() -> PlanRuntime {
        let mut engine = EngineSection::default();
        engine.compute_progress = true;
        PlanRuntime::new(&engine, FuelSection::default())
    }

    fn origin() -> EstimatedState {
        EstimatedState {
            header: Header::default(),
            lat: 0.0,
            lon: 0.0,
            depth: 0.0,
            speed: 0.0,
        }
    }

    #[test]
    fn test_parse_computes_statistics() {
        let mut rt = runtime();
        let stats = rt
            .parse(
                two_goto_spec(),
                &supported(),
                &HashSet::new(),
                false,
                Some(&origin()),
            )
            .expect("parse");
        assert_eq!(stats.maneuver_count, 2);
        assert!(stats.total_distance_m > 2000.0);
        let duration = stats.total_duration_s.expect("duration");
        assert!((duration - stats.total_distance_m / 1.5).abs() < 1.0);
    }

    #[test]
    fn test_unsupported_maneuver_clears_model() {
        let mut rt = runtime();
        let mut supported = supported();
        supported.remove("Goto");
        let err = rt
            .parse(two_goto_spec(), &supported, &HashSet::new(), false, None)
            .expect_err("must fail");
        assert!(matches!(err, ParseError::UnsupportedManeuver { .. }));
        assert!(!rt.has_plan());
        assert!(rt.load_start_maneuver().is_none());
    }

    #[test]
    fn test_unknown_required_entity_rejected() {
        let mut rt = runtime();
        let mut spec = two_goto_spec();
        spec.required_entities.push("Sidescan".to_string());
        let err = rt
            .parse(spec, &supported(), &HashSet::new(), false, None)
            .expect_err("must fail");
        assert_eq!(err, ParseError::UnknownEntity("Sidescan".to_string()));
    }

    #[test]
    fn test_navigation_to_completion() {
        let mut rt = runtime();
        rt.parse(two_goto_spec(), &supported(), &HashSet::new(), false, None)
            .expect("parse");
        rt.plan_started();

        let start = rt.load_start_maneuver().expect("start");
        assert_eq!(start.maneuver_id, "A");
        rt.maneuver_started("A");
        rt.maneuver_done();

        let next = rt.load_next_maneuver().expect("next");
        assert_eq!(next.maneuver_id, "B");
        rt.maneuver_started("B");
        rt.maneuver_done();

        assert!(rt.load_next_maneuver().is_none());
        assert!(rt.is_done());
    }

    #[test]
    fn test_required_entity_activation_failure() {
        let mut rt = runtime();
        let mut spec = two_goto_spec();
        spec.required_entities.push("IMU".to_string());
        let known = HashSet::from(["IMU".to_string()]);
        rt.parse(spec, &supported(), &known, false, None).expect("parse");

        assert!(rt
            .on_entity_activation_state("IMU", ActivationState::Active, "")
            .is_ok());
        assert!(rt
            .on_entity_activation_state("Camera", ActivationState::ActivationFailed, "x")
            .is_ok());
        let err = rt
            .on_entity_activation_state("IMU", ActivationState::ActivationFailed, "no power")
            .expect_err("must fail");
        assert!(err.contains("no power"));
    }

    #[test]
    fn test_progress_through_plan() {
        let mut rt = runtime();
        rt.parse(
            two_goto_spec(),
            &supported(),
            &HashSet::new(),
            false,
            Some(&origin()),
        )
        .expect("parse");
        rt.plan_started();
        rt.maneuver_started("A");

        let mcs = ManeuverControlState {
            header: Header::default(),
            state: ManeuverState::Execution,
            eta: 0,
            info: String::new(),
        };
        let p = rt.update_progress(&mcs);
        assert!(p > 0.0, "got {p}");
        assert!(rt.get_eta() >= 0);
    }

    #[test]
    fn test_fuel_level_survives_clear() {
        let mut rt = runtime();
        rt.on_fuel_level(&FuelLevel {
            header: Header::default(),
            value: 77.0,
            confidence: 90.0,
        });
        rt.clear();
        // A fresh parse can still produce a forecast
        let stats = rt
            .parse(
                two_goto_spec(),
                &supported(),
                &HashSet::new(),
                false,
                Some(&origin()),
            )
            .expect("parse");
        assert!(stats.fuel.is_some());
    }
}
