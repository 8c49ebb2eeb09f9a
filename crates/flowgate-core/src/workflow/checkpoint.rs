//! Durable audit and event-log writes for workflow executions.
//!
//! Wraps `WorkflowRepository` with the operations the runner needs: open and
//! finalize per-node audit records, append applied state-machine events,
//! persist the current state, and rebuild a state by replaying its log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowgate_types::execution::{NodeExecutionStatus, WorkflowExecutionNode};
use flowgate_types::state::{RecordedEvent, WorkflowState};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::workflow::{NodeCompletion, WorkflowRepository};

use super::state_machine::replay;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory mock, etc.). Shared between the runner and the node
/// activities it spawns.
pub struct CheckpointManager<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Node audit
    // -----------------------------------------------------------------------

    /// Open a `running` audit record for a node and return its id.
    pub async fn node_started(
        &self,
        execution_id: Uuid,
        node_id: Uuid,
        node_key: &str,
        attempt: u32,
        input: Option<Value>,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, CheckpointError> {
        let record_id = Uuid::now_v7();
        let record = WorkflowExecutionNode {
            id: record_id,
            execution_id,
            node_id,
            node_key: node_key.to_string(),
            status: NodeExecutionStatus::Running,
            attempt,
            input,
            output: None,
            error: None,
            started_at,
            completed_at: None,
            duration_ms: None,
        };

        self.repo
            .create_node_execution(&record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution_id,
            node_key,
            record_id = %record_id,
            "checkpointed node start"
        );
        Ok(record_id)
    }

    /// Finalize an audit record. Called exactly once per record.
    pub async fn node_finished(
        &self,
        record_id: Uuid,
        status: NodeExecutionStatus,
        output: Option<&Value>,
        error: Option<&str>,
        duration_ms: u64,
    ) -> Result<(), CheckpointError> {
        self.repo
            .complete_node_execution(
                &record_id,
                NodeCompletion {
                    status,
                    output,
                    error,
                    completed_at: Utc::now(),
                    duration_ms,
                },
            )
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            record_id = %record_id,
            status = status.as_str(),
            "checkpointed node finish"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution state
    // -----------------------------------------------------------------------

    /// Append one applied event and persist the state it produced.
    pub async fn record_transition(
        &self,
        event: &RecordedEvent,
        state: &WorkflowState,
    ) -> Result<(), CheckpointError> {
        self.repo
            .append_event(event)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        self.repo
            .update_execution_state(&event.execution_id, state, None, None)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %event.execution_id,
            sequence = event.sequence,
            event = event.event.name(),
            phase = %state.phase,
            "checkpointed transition"
        );
        Ok(())
    }

    /// Persist the terminal state with its completion time and registry snapshot.
    pub async fn execution_finished(
        &self,
        execution_id: Uuid,
        state: &WorkflowState,
        registry: &Value,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_execution_state(&execution_id, state, Some(Utc::now()), Some(registry))
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution_id,
            phase = %state.phase,
            "checkpointed execution finish"
        );
        Ok(())
    }

    /// Rebuild an execution's state from its persisted event log.
    pub async fn replay_state(&self, execution_id: Uuid) -> Result<WorkflowState, CheckpointError> {
        if self
            .repo
            .get_execution(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .is_none()
        {
            return Err(CheckpointError::ExecutionNotFound(execution_id));
        }

        let events = self
            .repo
            .list_events(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        Ok(replay(events.iter().map(|r| &r.event)))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("workflow execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::state::{WorkflowEvent, WorkflowPhase};

    use crate::testing::{MemoryWorkflowRepository, sample_execution};
    use crate::workflow::state_machine::EventLog;

    #[tokio::test]
    async fn test_node_audit_lifecycle() {
        let repo = Arc::new(MemoryWorkflowRepository::default());
        let checkpoint = CheckpointManager::new(repo.clone());
        let execution_id = Uuid::now_v7();

        let record_id = checkpoint
            .node_started(execution_id, Uuid::now_v7(), "create", 1, None, Utc::now())
            .await
            .unwrap();
        checkpoint
            .node_finished(
                record_id,
                NodeExecutionStatus::Failed,
                None,
                Some("title is required"),
                12,
            )
            .await
            .unwrap();

        let records = repo.list_node_executions(&execution_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, NodeExecutionStatus::Failed);
        assert_eq!(records[0].error.as_deref(), Some("title is required"));
        assert_eq!(records[0].duration_ms, Some(12));

        // A second finalization is rejected.
        assert!(checkpoint
            .node_finished(record_id, NodeExecutionStatus::Completed, None, None, 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_replay_matches_recorded_state() {
        let repo = Arc::new(MemoryWorkflowRepository::default());
        let checkpoint = CheckpointManager::new(repo.clone());
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let node = Uuid::now_v7();
        let mut log = EventLog::new(execution.id);
        for event in [
            WorkflowEvent::NodesReady { node_ids: vec![node] },
            WorkflowEvent::NodeCompleted { node_id: node },
            WorkflowEvent::AllNodesCompleted,
        ] {
            let recorded = log.apply(event);
            checkpoint
                .record_transition(&recorded, log.state())
                .await
                .unwrap();
        }

        let replayed = checkpoint.replay_state(execution.id).await.unwrap();
        assert_eq!(replayed.phase, WorkflowPhase::Completed);
        assert_eq!(&replayed, log.state());

        let stored = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.state, replayed);
    }

    #[tokio::test]
    async fn test_replay_unknown_execution() {
        let checkpoint = CheckpointManager::new(Arc::new(MemoryWorkflowRepository::default()));
        assert!(matches!(
            checkpoint.replay_state(Uuid::now_v7()).await,
            Err(CheckpointError::ExecutionNotFound(_))
        ));
    }

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("connection lost".to_string());
        assert!(err.to_string().contains("connection lost"));
    }
}
