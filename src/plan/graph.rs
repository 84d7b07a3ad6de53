//! Navigable maneuver graph built from a plan specification.
//!
//! Validates the structural invariants at build time (unique ids, known
//! endpoints, known guards, reachability from the start maneuver) so the
//! rest of the engine can navigate without re-checking.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::messages::{PlanManeuver, PlanSpecification, PlanTransition};

use super::ParseError;

/// Guard strings a transition may carry. Empty means unconditional;
/// `"done"` is accepted for compatibility with consoles that write it out
/// explicitly. Both pass when the source maneuver finishes.
fn guard_is_known(guard: &str) -> bool {
    guard.is_empty() || guard.eq_ignore_ascii_case("done")
}

/// An ordered, validated maneuver graph.
#[derive(Debug, Default)]
pub struct PlanGraph {
    maneuvers: Vec<PlanManeuver>,
    index: HashMap<String, usize>,
    transitions: Vec<PlanTransition>,
    start: Option<usize>,
}

impl PlanGraph {
    /// Build and validate the graph of a specification.
    ///
    /// An empty plan (no maneuvers) is structurally valid; execution of it
    /// completes immediately.
    pub fn build(spec: &PlanSpecification) -> Result<Self, ParseError> {
        let mut index = HashMap::with_capacity(spec.maneuvers.len());
        for (i, pm) in spec.maneuvers.iter().enumerate() {
            if index.insert(pm.maneuver_id.clone(), i).is_some() {
                return Err(ParseError::DuplicateManeuver(pm.maneuver_id.clone()));
            }
        }

        let start = if spec.maneuvers.is_empty() {
            None
        } else {
            Some(
                *index
                    .get(&spec.start_man_id)
                    .ok_or_else(|| ParseError::UnknownStartManeuver(spec.start_man_id.clone()))?,
            )
        };

        for t in &spec.transitions {
            for endpoint in [&t.source_man, &t.dest_man] {
                if !index.contains_key(endpoint) {
                    return Err(ParseError::UnknownTransitionEndpoint(endpoint.clone()));
                }
            }
            if !guard_is_known(&t.guard) {
                return Err(ParseError::UnknownGuard {
                    source_id: t.source_man.clone(),
                    guard: t.guard.clone(),
                });
            }
        }

        let graph = Self {
            maneuvers: spec.maneuvers.clone(),
            index,
            transitions: spec.transitions.clone(),
            start,
        };
        graph.check_reachability()?;
        Ok(graph)
    }

    /// Every maneuver must be reachable from the start maneuver.
    fn check_reachability(&self) -> Result<(), ParseError> {
        let Some(start) = self.start else {
            return Ok(());
        };
        let mut reached = HashSet::from([start]);
        let mut frontier = VecDeque::from([start]);
        while let Some(i) = frontier.pop_front() {
            let id = &self.maneuvers[i].maneuver_id;
            for t in self.transitions.iter().filter(|t| &t.source_man == id) {
                let j = self.index[&t.dest_man];
                if reached.insert(j) {
                    frontier.push_back(j);
                }
            }
        }
        for (i, pm) in self.maneuvers.iter().enumerate() {
            if !reached.contains(&i) {
                return Err(ParseError::UnreachableManeuver(pm.maneuver_id.clone()));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.maneuvers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.maneuvers.len()
    }

    pub fn maneuvers(&self) -> &[PlanManeuver] {
        &self.maneuvers
    }

    /// The maneuver execution starts at, or `None` for an empty plan.
    pub fn start_maneuver(&self) -> Option<&PlanManeuver> {
        self.start.map(|i| &self.maneuvers[i])
    }

    pub fn get(&self, id: &str) -> Option<&PlanManeuver> {
        self.index.get(id).map(|&i| &self.maneuvers[i])
    }

    /// Successor of a finished maneuver, or `None` when the plan is done.
    ///
    /// When more than one transition leaves `man_id`, the first declared in
    /// the specification wins. This matches the behaviour operator consoles
    /// rely on when they emit branches in priority order.
    pub fn next_after(&self, man_id: &str) -> Option<&PlanManeuver> {
        self.transitions
            .iter()
            .find(|t| t.source_man == man_id && guard_is_known(&t.guard))
            .map(|t| &self.maneuvers[self.index[&t.dest_man]])
    }

    /// The maneuvers in execution order, following the same first-declared
    /// transition choice as [`next_after`](Self::next_after). Stops before
    /// revisiting a maneuver, so looping plans yield one pass.
    pub fn execution_chain(&self) -> Vec<&PlanManeuver> {
        let mut chain = Vec::with_capacity(self.maneuvers.len());
        let mut seen = HashSet::new();
        let mut cursor = self.start_maneuver();
        while let Some(pm) = cursor {
            if !seen.insert(pm.maneuver_id.clone()) {
                break;
            }
            chain.push(pm);
            cursor = self.next_after(&pm.maneuver_id);
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Maneuver;

    fn idle(id: &str) -> PlanManeuver {
        PlanManeuver {
            maneuver_id: id.to_string(),
            data: Maneuver::Idle { duration: 5.0 },
            memento: None,
        }
    }

    fn transition(src: &str, dst: &str) -> PlanTransition {
        PlanTransition {
            source_man: src.to_string(),
            dest_man: dst.to_string(),
            guard: String::new(),
        }
    }

    fn chain_spec(ids: &[&str]) -> PlanSpecification {
        PlanSpecification {
            plan_id: "p".to_string(),
            description: String::new(),
            start_man_id: ids.first().map(|s| s.to_string()).unwrap_or_default(),
            maneuvers: ids.iter().map(|id| idle(id)).collect(),
            transitions: ids.windows(2).map(|w| transition(w[0], w[1])).collect(),
            required_entities: Vec::new(),
        }
    }

    #[test]
    fn test_chain_navigation() {
        let graph = PlanGraph::build(&chain_spec(&["a", "b", "c"])).expect("build");
        assert_eq!(graph.start_maneuver().map(|m| m.maneuver_id.as_str()), Some("a"));
        assert_eq!(graph.next_after("a").map(|m| m.maneuver_id.as_str()), Some("b"));
        assert_eq!(graph.next_after("b").map(|m| m.maneuver_id.as_str()), Some("c"));
        assert!(graph.next_after("c").is_none());
    }

    #[test]
    fn test_empty_plan_is_valid() {
        let graph = PlanGraph::build(&chain_spec(&[])).expect("build");
        assert!(graph.is_empty());
        assert!(graph.start_maneuver().is_none());
    }

    #[test]
    fn test_duplicate_maneuver_rejected() {
        let mut spec = chain_spec(&["a", "b"]);
        spec.maneuvers.push(idle("a"));
        assert!(matches!(
            PlanGraph::build(&spec),
            Err(ParseError::DuplicateManeuver(id)) if id == "a"
        ));
    }

    #[test]
    fn test_unknown_start_rejected() {
        let mut spec = chain_spec(&["a", "b"]);
        spec.start_man_id = "zz".to_string();
        assert!(matches!(
            PlanGraph::build(&spec),
            Err(ParseError::UnknownStartManeuver(id)) if id == "zz"
        ));
    }

    #[test]
    fn test_dangling_transition_rejected() {
        let mut spec = chain_spec(&["a", "b"]);
        spec.transitions.push(transition("b", "ghost"));
        assert!(matches!(
            PlanGraph::build(&spec),
            Err(ParseError::UnknownTransitionEndpoint(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_unreachable_maneuver_rejected() {
        let mut spec = chain_spec(&["a", "b"]);
        spec.maneuvers.push(idle("island"));
        assert!(matches!(
            PlanGraph::build(&spec),
            Err(ParseError::UnreachableManeuver(id)) if id == "island"
        ));
    }

    #[test]
    fn test_unknown_guard_rejected() {
        let mut spec = chain_spec(&["a", "b"]);
        spec.transitions[0].guard = "battery_low".to_string();
        assert!(matches!(
            PlanGraph::build(&spec),
            Err(ParseError::UnknownGuard { .. })
        ));
    }

    #[test]
    fn test_conflicting_transitions_first_declared_wins() {
        let mut spec = chain_spec(&["a", "b", "c"]);
        // Second transition out of "a", declared after a->b
        spec.transitions.push(transition("a", "c"));
        // "c" stays reachable through b
        let graph = PlanGraph::build(&spec).expect("build");
        assert_eq!(graph.next_after("a").map(|m| m.maneuver_id.as_str()), Some("b"));
    }

    #[test]
    fn test_execution_chain_stops_on_loop() {
        let mut spec = chain_spec(&["a", "b"]);
        spec.transitions.push(transition("b", "a"));
        let graph = PlanGraph::build(&spec).expect("build");
        let chain: Vec<_> = graph
            .execution_chain()
            .iter()
            .map(|m| m.maneuver_id.clone())
            .collect();
        assert_eq!(chain, vec!["a", "b"]);
    }
}
