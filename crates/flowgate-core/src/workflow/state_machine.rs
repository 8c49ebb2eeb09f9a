//! Workflow state machine.
//!
//! `transition` is a pure reducer: it never mutates the input state and
//! always returns a new value, so an `EventLog` can be replayed to rebuild
//! the state of any execution.
//!
//! | From | Event | To |
//! |---|---|---|
//! | initializing | nodes_ready | executing_nodes |
//! | executing_nodes | nodes_ready / node_completed | executing_nodes |
//! | executing_nodes | node_failed | failed |
//! | executing_nodes | all_nodes_completed | completed |
//! | any non-terminal | workflow_failed | failed |
//! | terminal | any | unchanged |

use chrono::Utc;
use flowgate_types::state::{RecordedEvent, WorkflowEvent, WorkflowPhase, WorkflowState};
use uuid::Uuid;

/// Apply one event to a state, producing the next state.
pub fn transition(state: &WorkflowState, event: &WorkflowEvent) -> WorkflowState {
    use WorkflowEvent as E;
    use WorkflowPhase as P;

    if state.is_terminal() {
        tracing::debug!(
            phase = %state.phase,
            event = event.name(),
            "ignoring event on terminal state"
        );
        return state.clone();
    }

    let mut next = state.clone();
    match (state.phase, event) {
        (P::Initializing | P::ExecutingNodes, E::NodesReady { node_ids }) => {
            next.phase = P::ExecutingNodes;
            for id in node_ids {
                if !state.knows(id) {
                    next.active_nodes.insert(*id);
                }
            }
        }
        (P::ExecutingNodes, E::NodeCompleted { node_id }) => {
            if next.active_nodes.remove(node_id) {
                next.completed_nodes.insert(*node_id);
            } else {
                tracing::warn!(node_id = %node_id, "completion for node that is not active");
            }
        }
        (P::ExecutingNodes, E::NodeFailed { node_id, error }) => {
            next.active_nodes.remove(node_id);
            next.completed_nodes.remove(node_id);
            next.failed_nodes.insert(*node_id);
            next.phase = P::Failed;
            next.error = Some(error.clone());
        }
        (P::ExecutingNodes, E::AllNodesCompleted) => {
            if state.active_nodes.is_empty() && state.failed_nodes.is_empty() {
                next.phase = P::Completed;
            } else {
                tracing::warn!(
                    active = state.active_nodes.len(),
                    failed = state.failed_nodes.len(),
                    "all_nodes_completed while nodes are still open"
                );
            }
        }
        (_, E::WorkflowFailed { reason }) => {
            next.phase = P::Failed;
            next.error = Some(reason.clone());
        }
        (phase, event) => {
            tracing::warn!(%phase, event = event.name(), "event not valid in this phase");
        }
    }
    next
}

/// Fold a sequence of events from the initial state.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a WorkflowEvent>) -> WorkflowState {
    events
        .into_iter()
        .fold(WorkflowState::initial(), |state, event| transition(&state, event))
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Append-only log of the events applied to one execution.
#[derive(Debug, Clone)]
pub struct EventLog {
    execution_id: Uuid,
    state: WorkflowState,
    events: Vec<RecordedEvent>,
}

impl EventLog {
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            state: WorkflowState::initial(),
            events: Vec::new(),
        }
    }

    /// Apply `event`, append it, and return the recorded entry.
    pub fn apply(&mut self, event: WorkflowEvent) -> RecordedEvent {
        self.state = transition(&self.state, &event);
        let recorded = RecordedEvent {
            execution_id: self.execution_id,
            sequence: self.events.len() as u64 + 1,
            event,
            recorded_at: Utc::now(),
        };
        self.events.push(recorded.clone());
        recorded
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// Rebuild the state from the log alone.
    pub fn replay(&self) -> WorkflowState {
        replay(self.events.iter().map(|r| &r.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::now_v7()).collect()
    }

    fn set(ids: &[Uuid]) -> BTreeSet<Uuid> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_nodes_ready_from_initializing() {
        let n = ids(2);
        let state = transition(
            &WorkflowState::initial(),
            &WorkflowEvent::NodesReady {
                node_ids: n.clone(),
            },
        );
        assert_eq!(state.phase, WorkflowPhase::ExecutingNodes);
        assert_eq!(state.active_nodes, set(&n));
    }

    #[test]
    fn test_input_state_is_not_mutated() {
        let initial = WorkflowState::initial();
        let n = ids(1);
        let _ = transition(&initial, &WorkflowEvent::NodesReady { node_ids: n });
        assert_eq!(initial, WorkflowState::initial());
    }

    #[test]
    fn test_linear_scenario() {
        let n = ids(3);
        let (a, b, c) = (n[0], n[1], n[2]);
        let mut log = EventLog::new(Uuid::now_v7());
        log.apply(WorkflowEvent::NodesReady { node_ids: vec![a] });
        log.apply(WorkflowEvent::NodeCompleted { node_id: a });
        log.apply(WorkflowEvent::NodesReady { node_ids: vec![b] });
        log.apply(WorkflowEvent::NodeCompleted { node_id: b });
        log.apply(WorkflowEvent::NodesReady { node_ids: vec![c] });
        log.apply(WorkflowEvent::NodeCompleted { node_id: c });
        log.apply(WorkflowEvent::AllNodesCompleted);

        assert_eq!(log.state().phase, WorkflowPhase::Completed);
        assert_eq!(log.state().completed_nodes, set(&[a, b, c]));
        assert!(log.state().active_nodes.is_empty());
    }

    #[test]
    fn test_failure_is_sticky() {
        let n = ids(3);
        let (a, b, c) = (n[0], n[1], n[2]);
        let mut state = WorkflowState::initial();
        for event in [
            WorkflowEvent::NodesReady { node_ids: vec![a] },
            WorkflowEvent::NodeCompleted { node_id: a },
            WorkflowEvent::NodesReady {
                node_ids: vec![b, c],
            },
            WorkflowEvent::NodeFailed {
                node_id: b,
                error: "timeout".to_string(),
            },
        ] {
            state = transition(&state, &event);
        }
        assert_eq!(state.phase, WorkflowPhase::Failed);
        assert_eq!(state.error.as_deref(), Some("timeout"));
        assert!(state.failed_nodes.contains(&b));
        assert!(state.active_nodes.contains(&c));

        let after = transition(&state, &WorkflowEvent::NodeCompleted { node_id: c });
        assert_eq!(after, state);
        let after = transition(&after, &WorkflowEvent::AllNodesCompleted);
        assert_eq!(after.phase, WorkflowPhase::Failed);
    }

    #[test]
    fn test_all_nodes_completed_requires_empty_active() {
        let n = ids(1);
        let state = transition(
            &WorkflowState::initial(),
            &WorkflowEvent::NodesReady {
                node_ids: n.clone(),
            },
        );
        let state = transition(&state, &WorkflowEvent::AllNodesCompleted);
        assert_eq!(state.phase, WorkflowPhase::ExecutingNodes);
    }

    #[test]
    fn test_completed_is_terminal() {
        let n = ids(1);
        let mut state = WorkflowState::initial();
        for event in [
            WorkflowEvent::NodesReady {
                node_ids: n.clone(),
            },
            WorkflowEvent::NodeCompleted { node_id: n[0] },
            WorkflowEvent::AllNodesCompleted,
        ] {
            state = transition(&state, &event);
        }
        assert_eq!(state.phase, WorkflowPhase::Completed);

        let failed = transition(
            &state,
            &WorkflowEvent::WorkflowFailed {
                reason: "late".to_string(),
            },
        );
        assert_eq!(failed, state);
        let again = transition(&state, &WorkflowEvent::AllNodesCompleted);
        assert_eq!(again, state);
    }

    #[test]
    fn test_workflow_failed_from_initializing() {
        let state = transition(
            &WorkflowState::initial(),
            &WorkflowEvent::WorkflowFailed {
                reason: "graph stalled".to_string(),
            },
        );
        assert_eq!(state.phase, WorkflowPhase::Failed);
        assert_eq!(state.error.as_deref(), Some("graph stalled"));
    }

    #[test]
    fn test_invalid_transition_is_ignored() {
        let n = ids(1);
        let initial = WorkflowState::initial();
        let state = transition(&initial, &WorkflowEvent::NodeCompleted { node_id: n[0] });
        assert_eq!(state, initial);
        let state = transition(&initial, &WorkflowEvent::AllNodesCompleted);
        assert_eq!(state, initial);
    }

    #[test]
    fn test_nodes_ready_does_not_reactivate() {
        let n = ids(1);
        let mut state = WorkflowState::initial();
        for event in [
            WorkflowEvent::NodesReady {
                node_ids: n.clone(),
            },
            WorkflowEvent::NodeCompleted { node_id: n[0] },
            WorkflowEvent::NodesReady {
                node_ids: n.clone(),
            },
        ] {
            state = transition(&state, &event);
        }
        assert!(state.active_nodes.is_empty());
        assert_eq!(state.completed_nodes, set(&n));
    }

    #[test]
    fn test_sets_stay_disjoint() {
        let n = ids(4);
        let mut log = EventLog::new(Uuid::now_v7());
        log.apply(WorkflowEvent::NodesReady {
            node_ids: n.clone(),
        });
        log.apply(WorkflowEvent::NodeCompleted { node_id: n[0] });
        log.apply(WorkflowEvent::NodeCompleted { node_id: n[1] });
        log.apply(WorkflowEvent::NodeFailed {
            node_id: n[2],
            error: "boom".to_string(),
        });
        let s = log.state();
        assert!(s.active_nodes.is_disjoint(&s.completed_nodes));
        assert!(s.active_nodes.is_disjoint(&s.failed_nodes));
        assert!(s.completed_nodes.is_disjoint(&s.failed_nodes));
    }

    #[test]
    fn test_event_log_replay_matches() {
        let n = ids(2);
        let mut log = EventLog::new(Uuid::now_v7());
        log.apply(WorkflowEvent::NodesReady {
            node_ids: n.clone(),
        });
        log.apply(WorkflowEvent::NodeCompleted { node_id: n[1] });
        log.apply(WorkflowEvent::NodeCompleted { node_id: n[0] });
        log.apply(WorkflowEvent::AllNodesCompleted);

        let sequences: Vec<u64> = log.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(&log.replay(), log.state());
    }
}
