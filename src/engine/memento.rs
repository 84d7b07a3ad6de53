//! Memento Handler
//!
//! Pairs opaque resume tokens coming from the vehicle with the plan
//! execution they belong to. Each plan start gets a fresh `plan_ref`; the
//! handler keeps a bounded history of recent executions so tokens that
//! arrive late (after the next plan already started) can still be paired.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::defaults::MAX_TRACKED_PLANS;
use crate::messages::{Memento, PlanMemento};

/// Snapshot of one plan execution.
#[derive(Debug, Clone)]
struct TrackedPlan {
    plan_ref: u32,
    plan_id: String,
}

#[derive(Debug, Default)]
pub struct MementoHandler {
    tracked: VecDeque<TrackedPlan>,
}

impl MementoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a plan execution. Oldest snapshots are evicted beyond
    /// [`MAX_TRACKED_PLANS`].
    pub fn record(&mut self, plan_ref: u32, plan_id: &str) {
        if self.tracked.len() >= MAX_TRACKED_PLANS {
            self.tracked.pop_front();
        }
        self.tracked.push_back(TrackedPlan {
            plan_ref,
            plan_id: plan_id.to_string(),
        });
    }

    /// Pair a vehicle memento with its plan execution snapshot.
    ///
    /// Mementos whose `plan_ref` is unknown are discarded: they belong to
    /// an execution the engine no longer tracks (or never started).
    pub fn process(&self, m: &Memento) -> Option<PlanMemento> {
        let Some(tracked) = self.tracked.iter().find(|t| t.plan_ref == m.plan_ref) else {
            debug!(plan_ref = m.plan_ref, "Discarding memento for unknown plan execution");
            return None;
        };
        Some(PlanMemento {
            id: format!("{}-{}", tracked.plan_id, m.plan_ref),
            plan_id: tracked.plan_id.clone(),
            maneuver_id: m.maneuver_id.clone(),
            memento: m.memento.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Header;

    fn memento(plan_ref: u32, maneuver_id: &str) -> Memento {
        Memento {
            header: Header::default(),
            plan_ref,
            maneuver_id: maneuver_id.to_string(),
            memento: "state-blob".to_string(),
        }
    }

    #[test]
    fn test_known_plan_ref_produces_memento() {
        let mut h = MementoHandler::new();
        h.record(3, "survey-1");
        let pm = h.process(&memento(3, "M2")).expect("produced");
        assert_eq!(pm.plan_id, "survey-1");
        assert_eq!(pm.maneuver_id, "M2");
        assert_eq!(pm.id, "survey-1-3");
        assert_eq!(pm.memento, "state-blob");
    }

    #[test]
    fn test_unknown_plan_ref_discarded() {
        let mut h = MementoHandler::new();
        h.record(3, "survey-1");
        assert!(h.process(&memento(4, "M2")).is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut h = MementoHandler::new();
        for i in 0..(MAX_TRACKED_PLANS as u32 + 2) {
            h.record(i, &format!("plan-{i}"));
        }
        // The two oldest executions were evicted
        assert!(h.process(&memento(0, "m")).is_none());
        assert!(h.process(&memento(1, "m")).is_none());
        assert!(h.process(&memento(2, "m")).is_some());
    }
}
