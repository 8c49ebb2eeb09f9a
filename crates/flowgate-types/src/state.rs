//! Workflow execution state and state-machine events.
//!
//! `WorkflowState` is an immutable value: the reducer in `flowgate-core`
//! produces a new state for every applied `WorkflowEvent`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position of an execution in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Initializing,
    ExecutingNodes,
    Completed,
    Failed,
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ExecutingNodes => "executing_nodes",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-execution progress.
///
/// `active_nodes`, `completed_nodes` and `failed_nodes` are disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub phase: WorkflowPhase,
    #[serde(default)]
    pub active_nodes: BTreeSet<Uuid>,
    #[serde(default)]
    pub completed_nodes: BTreeSet<Uuid>,
    #[serde(default)]
    pub failed_nodes: BTreeSet<Uuid>,
    /// First failure reason, set when the phase becomes `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn initial() -> Self {
        Self {
            phase: WorkflowPhase::Initializing,
            active_nodes: BTreeSet::new(),
            completed_nodes: BTreeSet::new(),
            failed_nodes: BTreeSet::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether `node_id` has already been accounted for in any set.
    pub fn knows(&self, node_id: &Uuid) -> bool {
        self.active_nodes.contains(node_id)
            || self.completed_nodes.contains(node_id)
            || self.failed_nodes.contains(node_id)
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Events consumed by the workflow state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    NodesReady { node_ids: Vec<Uuid> },
    NodeCompleted { node_id: Uuid },
    NodeFailed { node_id: Uuid, error: String },
    AllNodesCompleted,
    WorkflowFailed { reason: String },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodesReady { .. } => "nodes_ready",
            Self::NodeCompleted { .. } => "node_completed",
            Self::NodeFailed { .. } => "node_failed",
            Self::AllNodesCompleted => "all_nodes_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
        }
    }
}

/// An applied event in an execution's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub execution_id: Uuid,
    /// 1-based position in the log.
    pub sequence: u64,
    pub event: WorkflowEvent,
    pub recorded_at: DateTime<Utc>,
}
