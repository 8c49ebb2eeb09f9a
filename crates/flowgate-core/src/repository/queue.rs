//! Execution queue repository trait definition.
//!
//! The admission queue is the only state shared between dispatcher processes.
//! Implementations must make `claim_pending` and `reclaim_stale` safe under
//! concurrent callers without any in-process locking: each row is handed to
//! at most one caller per claim.

use std::future::Future;

use chrono::{DateTime, Utc};
use flowgate_types::error::RepositoryError;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};
use uuid::Uuid;

pub trait ExecutionQueueRepository: Send + Sync {
    /// Insert a new `pending` row.
    fn enqueue(
        &self,
        entry: &ExecutionQueueEntry,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Claim up to `batch_size` pending rows, oldest first, moving them to
    /// `claimed` with a claim timestamp in a single transaction. Rows locked
    /// by a concurrent claimer are skipped, never waited on.
    fn claim_pending(
        &self,
        batch_size: u32,
    ) -> impl Future<Output = Result<Vec<ExecutionQueueEntry>, RepositoryError>> + Send;

    /// Move a `claimed` row to `dispatched`, binding its execution id.
    /// Any other current status is a `Conflict`; a run that finishes before
    /// this call has already moved the row to a terminal status.
    fn mark_dispatched(
        &self,
        entry_id: &Uuid,
        execution_id: &Uuid,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Move a `claimed` or `dispatched` row to a terminal status, binding
    /// `execution_id` when the row has none yet. Rows in any other status
    /// are a `Conflict`.
    fn mark_terminal(
        &self,
        entry_id: &Uuid,
        status: QueueStatus,
        execution_id: Option<&Uuid>,
        error: Option<&str>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Reset up to `limit` rows claimed before `claimed_before` back to
    /// `pending`, using the same skip-locked selection as `claim_pending`.
    /// Returns the ids of the reset rows.
    fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    fn get(
        &self,
        entry_id: &Uuid,
    ) -> impl Future<Output = Result<Option<ExecutionQueueEntry>, RepositoryError>> + Send;

    /// List rows, newest first, optionally restricted to one workspace.
    fn list(
        &self,
        workspace_id: Option<&Uuid>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<ExecutionQueueEntry>, RepositoryError>> + Send;
}
