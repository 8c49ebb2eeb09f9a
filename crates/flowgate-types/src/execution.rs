//! Execution records: one run of a definition version and its per-node audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::TriggerContext;
use crate::state::WorkflowState;

/// One run instance of a workflow definition version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub definition_version_id: Uuid,
    pub workspace_id: Uuid,
    /// Admission queue row that started this run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_entry_id: Option<Uuid>,
    pub state: WorkflowState,
    pub trigger: TriggerContext,
    /// Snapshot of the data registry, written when the run finishes.
    #[serde(default)]
    pub registry: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of a single node run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Per-node audit record.
///
/// Created when the node starts and updated exactly once when it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionNode {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: Uuid,
    pub node_key: String,
    pub status: NodeExecutionStatus,
    pub attempt: u32,
    /// Template-resolved inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Original error text, recorded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}
