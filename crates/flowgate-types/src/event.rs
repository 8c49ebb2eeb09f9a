//! Event types for the Flowgate engine event bus.
//!
//! `EngineEvent` is broadcast while runs execute and while the dispatcher
//! moves queue rows. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Engine lifecycle events, consumed by loggers and the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ExecutionStarted {
        execution_id: Uuid,
        definition_version_id: Uuid,
        workspace_id: Uuid,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        duration_ms: u64,
    },
    ExecutionFailed {
        execution_id: Uuid,
        error: String,
    },

    NodeStarted {
        execution_id: Uuid,
        node_id: Uuid,
        node_key: String,
    },
    NodeCompleted {
        execution_id: Uuid,
        node_id: Uuid,
        node_key: String,
        duration_ms: u64,
    },
    /// The node category has no executor; not a failure.
    NodeSkipped {
        execution_id: Uuid,
        node_id: Uuid,
        node_key: String,
        reason: String,
    },
    NodeFailed {
        execution_id: Uuid,
        node_id: Uuid,
        node_key: String,
        error: String,
    },

    QueueEntryClaimed {
        entry_id: Uuid,
        claim_count: u32,
    },
    QueueEntryDispatched {
        entry_id: Uuid,
        execution_id: Uuid,
    },
    QueueEntryReclaimed {
        entry_id: Uuid,
    },
}

impl EngineEvent {
    /// Execution this event belongs to, if any.
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeSkipped { execution_id, .. }
            | Self::NodeFailed { execution_id, .. }
            | Self::QueueEntryDispatched { execution_id, .. } => Some(*execution_id),
            Self::QueueEntryClaimed { .. } | Self::QueueEntryReclaimed { .. } => None,
        }
    }
}
