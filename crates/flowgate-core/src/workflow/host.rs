//! Execution host port and the in-process implementation.
//!
//! The dispatcher hands each claimed queue row to an `ExecutionHost`, which
//! must create the execution record and start the run without waiting for it
//! to finish. A durable host would also own retries; `LocalExecutionHost`
//! runs every activity once on the current tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flowgate_types::error::RepositoryError;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::repository::queue::ExecutionQueueRepository;
use crate::repository::workflow::WorkflowRepository;

use super::runner::{ExecutorError, WorkflowRunner};

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("definition version {0} not found")]
    DefinitionNotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("execution host is shutting down")]
    ShuttingDown,
}

impl HostError {
    /// Whether retrying the same queue row can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DefinitionNotFound(_))
    }
}

/// Starts runs for claimed queue rows.
pub trait ExecutionHost: Send + Sync {
    /// Create the execution for `entry` and start it. Returns the execution
    /// id as soon as the run is underway.
    fn start(
        &self,
        entry: &ExecutionQueueEntry,
    ) -> impl Future<Output = Result<Uuid, HostError>> + Send;
}

// ---------------------------------------------------------------------------
// LocalExecutionHost
// ---------------------------------------------------------------------------

/// Runs executions as tasks on the current runtime and settles their queue
/// rows when they finish.
pub struct LocalExecutionHost<R: WorkflowRepository, Q: ExecutionQueueRepository> {
    runner: Arc<WorkflowRunner<R>>,
    queue: Arc<Q>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl<R, Q> LocalExecutionHost<R, Q>
where
    R: WorkflowRepository + 'static,
    Q: ExecutionQueueRepository + 'static,
{
    pub fn new(runner: Arc<WorkflowRunner<R>>, queue: Arc<Q>) -> Self {
        let options = runner.activity_options();
        tracing::info!(
            start_to_close_timeout_secs = options.start_to_close_timeout_secs,
            max_attempts = options.max_attempts,
            "local execution host runs each activity once; max_attempts is left to durable hosts"
        );
        Self {
            runner,
            queue,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of runs still in progress.
    pub async fn active_runs(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Refuse new runs. Runs already started keep going.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Wait for every started run to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "execution task did not finish cleanly");
            }
        }
    }
}

impl<R, Q> ExecutionHost for LocalExecutionHost<R, Q>
where
    R: WorkflowRepository + 'static,
    Q: ExecutionQueueRepository + 'static,
{
    async fn start(&self, entry: &ExecutionQueueEntry) -> Result<Uuid, HostError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::ShuttingDown);
        }

        let def = self
            .runner
            .checkpoint()
            .repo()
            .get_definition_version(&entry.definition_version_id)
            .await?
            .ok_or(HostError::DefinitionNotFound(entry.definition_version_id))?;

        let execution = self
            .runner
            .start_execution(&def, entry.trigger.clone(), Some(entry.id))
            .await?;
        let execution_id = execution.id;

        let runner = Arc::clone(&self.runner);
        let queue = Arc::clone(&self.queue);
        let entry_id = entry.id;

        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let (status, error) = match runner.run(&def, &execution).await {
                Ok(outcome) if outcome.succeeded() => (QueueStatus::Completed, None),
                Ok(outcome) => (QueueStatus::Failed, outcome.state.error),
                Err(e) => {
                    tracing::warn!(execution_id = %execution_id, error = %e, "execution aborted");
                    (QueueStatus::Failed, Some(e.to_string()))
                }
            };

            if let Err(e) = queue
                .mark_terminal(&entry_id, status, Some(&execution_id), error.as_deref())
                .await
            {
                tracing::warn!(
                    entry_id = %entry_id,
                    execution_id = %execution_id,
                    error = %e,
                    "could not settle queue entry"
                );
            }
        });

        Ok(execution_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
