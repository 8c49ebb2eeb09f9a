//! Workflow repository trait definition.
//!
//! Defines the storage interface for published definition versions, execution
//! records, per-node audit records and the per-execution event log.

use std::future::Future;

use chrono::{DateTime, Utc};
use flowgate_types::error::RepositoryError;
use flowgate_types::execution::{NodeExecutionStatus, WorkflowExecution, WorkflowExecutionNode};
use flowgate_types::state::{RecordedEvent, WorkflowState};
use flowgate_types::workflow::WorkflowDefinitionVersion;
use uuid::Uuid;

/// Final values written to a node audit record.
#[derive(Debug, Clone)]
pub struct NodeCompletion<'a> {
    pub status: NodeExecutionStatus,
    pub output: Option<&'a serde_json::Value>,
    pub error: Option<&'a str>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Repository trait for workflow persistence.
///
/// Covers four entity families:
/// - **Definitions:** immutable published DAG snapshots.
/// - **Executions:** one record per run, carrying the current `WorkflowState`.
/// - **Node audit:** one record per node run, created on start and finalized once.
/// - **Events:** the append-only state-machine event log of each execution.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Insert a definition version. Versions are immutable; inserting an
    /// existing id or `(workflow_id, version)` pair is a `Conflict`.
    fn save_definition_version(
        &self,
        def: &WorkflowDefinitionVersion,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_definition_version(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowDefinitionVersion>, RepositoryError>> + Send;

    /// Highest published version number for a workflow, if any.
    fn latest_version_number(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<Option<u32>, RepositoryError>> + Send;

    /// List definition versions in a workspace, newest first.
    fn list_definition_versions(
        &self,
        workspace_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<WorkflowDefinitionVersion>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist a new state. `completed_at` and `registry` are written when given.
    fn update_execution_state(
        &self,
        execution_id: &Uuid,
        state: &WorkflowState,
        completed_at: Option<DateTime<Utc>>,
        registry: Option<&serde_json::Value>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// List executions in a workspace, newest first.
    fn list_executions(
        &self,
        workspace_id: &Uuid,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Node audit
    // -----------------------------------------------------------------------

    fn create_node_execution(
        &self,
        record: &WorkflowExecutionNode,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Finalize a `running` audit record. A record that is already final is a
    /// `Conflict`; an unknown id is `NotFound`.
    fn complete_node_execution(
        &self,
        record_id: &Uuid,
        completion: NodeCompletion<'_>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Audit records of an execution, ordered by start time.
    fn list_node_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<WorkflowExecutionNode>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Append to the event log. A duplicate `(execution_id, sequence)` is a `Conflict`.
    fn append_event(
        &self,
        event: &RecordedEvent,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// The event log of an execution, ordered by sequence.
    fn list_events(
        &self,
        execution_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<RecordedEvent>, RepositoryError>> + Send;
}
