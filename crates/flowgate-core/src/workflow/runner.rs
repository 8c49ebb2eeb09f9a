//! Run orchestration: drives one execution from `Initializing` to a terminal
//! phase.
//!
//! # Execution flow
//!
//! 1. Create the `WorkflowExecution` record (`start_execution`).
//! 2. Build the dependency resolver and take the initial ready batch.
//! 3. Apply `NodesReady` for each batch. Trigger nodes are completed on the
//!    spot without running; every other node is spawned as a `NodeActivity`
//!    on a `JoinSet`.
//! 4. Reconcile finished activities one at a time: record the step output,
//!    finalize the audit record, apply `NodeCompleted` or `NodeFailed`, and
//!    dispatch whatever became ready.
//! 5. Emit `AllNodesCompleted` once every node completed, or `WorkflowFailed`
//!    if the graph stalls or a task dies.
//! 6. Drain in-flight activities so their audit records close, then persist
//!    the terminal state with the registry snapshot.
//!
//! Every applied event is appended to the execution's event log before the
//! new state is persisted, so the state can be rebuilt by replay.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use flowgate_types::config::{ActivityOptions, RegistryLimits};
use flowgate_types::error::RepositoryError;
use flowgate_types::event::EngineEvent;
use flowgate_types::execution::{NodeExecutionStatus, WorkflowExecution};
use flowgate_types::output::{StepOutput, TriggerContext};
use flowgate_types::state::{WorkflowEvent, WorkflowPhase, WorkflowState};
use flowgate_types::workflow::WorkflowDefinitionVersion;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

use super::activity::{ActivityOutcome, NodeActivity, NodeActivityRequest, NodeActivityResult};
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::dag::DependencyResolver;
use super::node::ServiceProvider;
use super::registry::WorkflowDataRegistry;
use super::state_machine::EventLog;

// ---------------------------------------------------------------------------
// Error / outcome
// ---------------------------------------------------------------------------

/// Infrastructure failures that stop the runner itself. Node failures are not
/// errors here; they end the run in the `Failed` phase.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("could not create execution record: {0}")]
    Repository(#[from] RepositoryError),
}

/// Final view of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub execution_id: Uuid,
    pub state: WorkflowState,
    /// Registry snapshot as persisted on the execution record.
    pub registry: Value,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.state.phase == WorkflowPhase::Completed
    }
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Generic over `R: WorkflowRepository` so it works with any storage backend.
pub struct WorkflowRunner<R: WorkflowRepository> {
    checkpoint: Arc<CheckpointManager<R>>,
    activity: Arc<NodeActivity<R>>,
    event_bus: EventBus,
    limits: RegistryLimits,
}

impl<R: WorkflowRepository + 'static> WorkflowRunner<R> {
    pub fn new(
        repo: Arc<R>,
        services: ServiceProvider,
        event_bus: EventBus,
        options: ActivityOptions,
        limits: RegistryLimits,
    ) -> Self {
        let checkpoint = Arc::new(CheckpointManager::new(repo));
        let activity = Arc::new(NodeActivity::new(
            Arc::clone(&checkpoint),
            Arc::new(services),
            options,
            event_bus.clone(),
        ));
        Self {
            checkpoint,
            activity,
            event_bus,
            limits,
        }
    }

    pub fn checkpoint(&self) -> &CheckpointManager<R> {
        &self.checkpoint
    }

    pub fn activity_options(&self) -> &ActivityOptions {
        self.activity.options()
    }

    /// Create the execution record for a run of `def`.
    pub async fn start_execution(
        &self,
        def: &WorkflowDefinitionVersion,
        trigger: TriggerContext,
        queue_entry_id: Option<Uuid>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            definition_version_id: def.id,
            workspace_id: def.workspace_id,
            queue_entry_id,
            state: WorkflowState::initial(),
            trigger,
            registry: Value::Null,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.checkpoint.repo().create_execution(&execution).await?;

        self.event_bus.publish(EngineEvent::ExecutionStarted {
            execution_id: execution.id,
            definition_version_id: def.id,
            workspace_id: def.workspace_id,
        });
        tracing::info!(
            execution_id = %execution.id,
            workflow = %def.name,
            version = def.version,
            trigger = execution.trigger.source(),
            "workflow execution started"
        );
        Ok(execution)
    }

    /// Create an execution and run it to completion.
    pub async fn execute(
        &self,
        def: &WorkflowDefinitionVersion,
        trigger: TriggerContext,
    ) -> Result<RunOutcome, ExecutorError> {
        let execution = self.start_execution(def, trigger, None).await?;
        self.run(def, &execution).await
    }

    /// Drive an already-created execution to a terminal phase.
    pub async fn run(
        &self,
        def: &WorkflowDefinitionVersion,
        execution: &WorkflowExecution,
    ) -> Result<RunOutcome, ExecutorError> {
        let clock = Instant::now();
        let mut run = Run {
            runner: self,
            def,
            execution,
            log: EventLog::new(execution.id),
            registry: WorkflowDataRegistry::new(
                execution.id,
                execution.workspace_id,
                execution.trigger.clone(),
                self.limits.clone(),
            ),
            tasks: JoinSet::new(),
            auto_complete: VecDeque::new(),
        };

        let seeded = DependencyResolver::new(&def.nodes, &def.edges).and_then(|mut resolver| {
            let ready = resolver.initial_ready()?;
            Ok((resolver, ready))
        });
        match seeded {
            Ok((mut resolver, ready)) => run.drive(&mut resolver, ready).await?,
            Err(e) => {
                run.apply(WorkflowEvent::WorkflowFailed {
                    reason: e.to_string(),
                })
                .await?
            }
        }

        let state = run.log.state().clone();
        let registry = run.registry.to_json();
        self.checkpoint
            .execution_finished(execution.id, &state, &registry)
            .await?;

        let duration_ms = clock.elapsed().as_millis() as u64;
        if state.phase == WorkflowPhase::Completed {
            self.event_bus.publish(EngineEvent::ExecutionCompleted {
                execution_id: execution.id,
                duration_ms,
            });
            tracing::info!(
                execution_id = %execution.id,
                duration_ms,
                nodes = state.completed_nodes.len(),
                "workflow execution completed"
            );
        } else {
            let error = state.error.clone().unwrap_or_default();
            self.event_bus.publish(EngineEvent::ExecutionFailed {
                execution_id: execution.id,
                error: error.clone(),
            });
            tracing::info!(
                execution_id = %execution.id,
                duration_ms,
                error = %error,
                "workflow execution failed"
            );
        }

        Ok(RunOutcome {
            execution_id: execution.id,
            state,
            registry,
            duration_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-run driver
// ---------------------------------------------------------------------------

struct Run<'a, R: WorkflowRepository> {
    runner: &'a WorkflowRunner<R>,
    def: &'a WorkflowDefinitionVersion,
    execution: &'a WorkflowExecution,
    log: EventLog,
    registry: WorkflowDataRegistry,
    tasks: JoinSet<NodeActivityResult>,
    /// Trigger nodes made ready but not yet marked completed.
    auto_complete: VecDeque<Uuid>,
}

impl<R: WorkflowRepository + 'static> Run<'_, R> {
    async fn drive(
        &mut self,
        resolver: &mut DependencyResolver,
        ready: Vec<Uuid>,
    ) -> Result<(), ExecutorError> {
        self.dispatch(ready).await?;

        loop {
            while let Some(trigger_id) = self.auto_complete.pop_front() {
                self.complete_trigger(resolver, trigger_id).await?;
            }
            if self.log.state().is_terminal() {
                break;
            }
            if resolver.is_exhausted() {
                self.apply(WorkflowEvent::AllNodesCompleted).await?;
                break;
            }

            match self.tasks.join_next().await {
                Some(Ok(result)) => self.reconcile(resolver, result).await?,
                Some(Err(e)) => {
                    tracing::warn!(execution_id = %self.execution.id, error = %e, "node task died");
                    self.apply(WorkflowEvent::WorkflowFailed {
                        reason: format!("node task did not finish: {e}"),
                    })
                    .await?;
                    break;
                }
                None => {
                    let pending = resolver.node_count() - self.log.state().completed_nodes.len();
                    self.apply(WorkflowEvent::WorkflowFailed {
                        reason: format!("execution stalled with {pending} nodes never ready"),
                    })
                    .await?;
                    break;
                }
            }
        }

        // Close out in-flight work. Events on a terminal state are no-ops.
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => self.reconcile(resolver, result).await?,
                Err(e) => {
                    tracing::warn!(execution_id = %self.execution.id, error = %e, "node task died")
                }
            }
        }
        Ok(())
    }

    /// Append an event to the log and persist the state it produced.
    async fn apply(&mut self, event: WorkflowEvent) -> Result<(), ExecutorError> {
        let recorded = self.log.apply(event);
        self.runner
            .checkpoint
            .record_transition(&recorded, self.log.state())
            .await?;
        Ok(())
    }

    async fn dispatch(&mut self, ready: Vec<Uuid>) -> Result<(), ExecutorError> {
        if ready.is_empty() || self.log.state().is_terminal() {
            return Ok(());
        }

        tracing::debug!(
            execution_id = %self.execution.id,
            batch = ready.len(),
            "dispatching ready nodes"
        );
        self.apply(WorkflowEvent::NodesReady {
            node_ids: ready.clone(),
        })
        .await?;

        let context = self.registry.template_context();
        for node_id in ready {
            let Some(node) = self.def.node(&node_id) else {
                continue;
            };
            if node.config.is_trigger() {
                self.auto_complete.push_back(node_id);
                continue;
            }

            let request = NodeActivityRequest {
                execution_id: self.execution.id,
                workspace_id: self.execution.workspace_id,
                node: node.clone(),
                context: context.clone(),
            };
            let activity = Arc::clone(&self.runner.activity);
            self.tasks.spawn(async move { activity.execute(request).await });
        }
        Ok(())
    }

    async fn complete_trigger(
        &mut self,
        resolver: &mut DependencyResolver,
        node_id: Uuid,
    ) -> Result<(), ExecutorError> {
        let Some(node) = self.def.node(&node_id) else {
            return Ok(());
        };
        let step = StepOutput {
            node_id,
            node_key: node.key.clone(),
            node_name: node.name.clone(),
            status: NodeExecutionStatus::Completed,
            output: None,
            skip_reason: None,
            executed_at: Utc::now(),
            duration_ms: 0,
        };
        if let Err(e) = self.registry.record(step) {
            return self
                .apply(WorkflowEvent::NodeFailed {
                    node_id,
                    error: e.to_string(),
                })
                .await;
        }
        self.apply(WorkflowEvent::NodeCompleted { node_id }).await?;
        self.advance(resolver, node_id).await
    }

    /// Fold one finished activity into the run.
    async fn reconcile(
        &mut self,
        resolver: &mut DependencyResolver,
        result: NodeActivityResult,
    ) -> Result<(), ExecutorError> {
        let node_id = result.node_id;
        let (status, output, skip_reason) = match &result.outcome {
            ActivityOutcome::Completed(output) => {
                (NodeExecutionStatus::Completed, Some(output.clone()), None)
            }
            ActivityOutcome::Skipped { reason } => {
                (NodeExecutionStatus::Skipped, None, Some(reason.clone()))
            }
            ActivityOutcome::Failed { error } => {
                self.finalize(&result, NodeExecutionStatus::Failed, None, Some(error))
                    .await;
                return self.fail_node(&result, error.clone()).await;
            }
        };

        let audit_output = match (&output, &skip_reason) {
            (Some(output), _) => Some(output.to_value()),
            (None, Some(reason)) => Some(json!({ "reason": reason })),
            (None, None) => None,
        };
        let step = StepOutput {
            node_id,
            node_key: result.node_key.clone(),
            node_name: result.node_name.clone(),
            status,
            output,
            skip_reason: skip_reason.clone(),
            executed_at: result.started_at,
            duration_ms: result.duration_ms,
        };
        if let Err(e) = self.registry.record(step) {
            let error = e.to_string();
            self.finalize(&result, NodeExecutionStatus::Failed, None, Some(&error))
                .await;
            return self.fail_node(&result, error).await;
        }

        self.finalize(&result, status, audit_output.as_ref(), None).await;
        self.apply(WorkflowEvent::NodeCompleted { node_id }).await?;

        let execution_id = self.execution.id;
        match skip_reason {
            Some(reason) => {
                tracing::debug!(
                    execution_id = %execution_id,
                    node_key = %result.node_key,
                    reason = %reason,
                    "node skipped"
                );
                self.runner.event_bus.publish(EngineEvent::NodeSkipped {
                    execution_id,
                    node_id,
                    node_key: result.node_key.clone(),
                    reason,
                });
            }
            None => {
                tracing::debug!(
                    execution_id = %execution_id,
                    node_key = %result.node_key,
                    duration_ms = result.duration_ms,
                    "node completed"
                );
                self.runner.event_bus.publish(EngineEvent::NodeCompleted {
                    execution_id,
                    node_id,
                    node_key: result.node_key.clone(),
                    duration_ms: result.duration_ms,
                });
            }
        }

        self.advance(resolver, node_id).await
    }

    async fn fail_node(
        &mut self,
        result: &NodeActivityResult,
        error: String,
    ) -> Result<(), ExecutorError> {
        tracing::debug!(
            execution_id = %self.execution.id,
            node_key = %result.node_key,
            error = %error,
            "node failed"
        );
        self.runner.event_bus.publish(EngineEvent::NodeFailed {
            execution_id: self.execution.id,
            node_id: result.node_id,
            node_key: result.node_key.clone(),
            error: error.clone(),
        });
        self.apply(WorkflowEvent::NodeFailed {
            node_id: result.node_id,
            error,
        })
        .await
    }

    /// Release successors of a completed node.
    async fn advance(
        &mut self,
        resolver: &mut DependencyResolver,
        node_id: Uuid,
    ) -> Result<(), ExecutorError> {
        match resolver.complete(node_id) {
            Ok(next) => self.dispatch(next).await,
            Err(e) => {
                self.apply(WorkflowEvent::WorkflowFailed {
                    reason: e.to_string(),
                })
                .await
            }
        }
    }

    /// Close the audit record. A write failure is logged, not fatal.
    async fn finalize(
        &mut self,
        result: &NodeActivityResult,
        status: NodeExecutionStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) {
        let Some(record_id) = result.record_id else {
            return;
        };
        if let Err(e) = self
            .runner
            .checkpoint
            .node_finished(record_id, status, output, error, result.duration_ms)
            .await
        {
            tracing::warn!(
                execution_id = %self.execution.id,
                node_key = %result.node_key,
                error = %e,
                "could not finalize node audit record"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
