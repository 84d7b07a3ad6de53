//! Helmsman: onboard mission plan engine for unmanned marine vehicles.
//!
//! Accepts high-level mission plans, translates them into an ordered
//! execution of maneuvers, drives the vehicle through calibration and
//! execution, and publishes continuous progress and status on the
//! vehicle's software bus.
//!
//! ## Architecture
//!
//! - **Engine State Machine**: top-level controller consuming bus events
//! - **Plan Model**: maneuver graph, statistics, progress, ETA, fuel
//! - **Vehicle Dialog**: request/reply tracking with deadlines
//! - **Plan Database**: persistent plan and memento store
//! - **Memento Handler**: resume-token pairing for mid-plan restarts

pub mod bus;
pub mod config;
pub mod db;
pub mod engine;
pub mod messages;
pub mod plan;

// Re-export engine configuration
pub use config::EngineConfig;

// Re-export commonly used types
pub use engine::{EngineState, PlanEngine};
pub use messages::{
    Maneuver, Message, PlanControl, PlanControlState, PlanManeuver, PlanMemento,
    PlanSpecification, PlanState,
};

// Re-export the plan model
pub use plan::{ParseError, PlanRuntime, PlanStatistics};

// Re-export storage
pub use db::{DbError, PlanDatabase};
