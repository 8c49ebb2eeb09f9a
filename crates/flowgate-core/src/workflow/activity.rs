//! Node activity: the unit of work an execution host runs for one node.
//!
//! An activity resolves the node's input templates against a snapshot of the
//! data registry, opens the node's audit record, runs the category executor
//! under the start-to-close timeout and reports the outcome. Finalizing the
//! audit record is left to the caller, which also applies the matching
//! state-machine event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flowgate_types::config::ActivityOptions;
use flowgate_types::event::EngineEvent;
use flowgate_types::output::NodeOutput;
use flowgate_types::workflow::WorkflowNode;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::CheckpointManager;
use super::node::{
    NodeContext, NodeExecution, ResolvedInputs, ServiceProvider, execute_node, input_templates,
};
use super::template::{TemplateError, resolve_value};

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// Everything an activity needs; owned so it can cross a task boundary.
#[derive(Debug, Clone)]
pub struct NodeActivityRequest {
    pub execution_id: Uuid,
    pub workspace_id: Uuid,
    pub node: WorkflowNode,
    /// Registry snapshot (`steps`, `trigger`, `workflow`) taken at dispatch.
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityOutcome {
    Completed(NodeOutput),
    Skipped { reason: String },
    /// Original error text, recorded verbatim in the audit record.
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct NodeActivityResult {
    pub node_id: Uuid,
    pub node_key: String,
    pub node_name: String,
    /// Audit record opened for this run; `None` when it could not be written.
    pub record_id: Option<Uuid>,
    pub outcome: ActivityOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// NodeActivity
// ---------------------------------------------------------------------------

pub struct NodeActivity<R: WorkflowRepository> {
    checkpoint: Arc<CheckpointManager<R>>,
    services: Arc<ServiceProvider>,
    options: ActivityOptions,
    event_bus: EventBus,
}

impl<R: WorkflowRepository> NodeActivity<R> {
    pub fn new(
        checkpoint: Arc<CheckpointManager<R>>,
        services: Arc<ServiceProvider>,
        options: ActivityOptions,
        event_bus: EventBus,
    ) -> Self {
        Self {
            checkpoint,
            services,
            options,
            event_bus,
        }
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    /// Run one node once. Never returns an error: every failure becomes an
    /// `ActivityOutcome::Failed` so the caller can reconcile it.
    pub async fn execute(&self, request: NodeActivityRequest) -> NodeActivityResult {
        let NodeActivityRequest {
            execution_id,
            workspace_id,
            node,
            context,
        } = request;

        self.event_bus.publish(EngineEvent::NodeStarted {
            execution_id,
            node_id: node.id,
            node_key: node.key.clone(),
        });

        let started_at = Utc::now();
        let clock = Instant::now();

        let templates = input_templates(&node.config);
        let resolved = resolve_inputs(&templates, &context);
        let audit_input = match &resolved {
            Ok(inputs) => Value::Object(inputs.clone()),
            Err(_) => Value::Object(templates.clone()),
        };

        let record_id = match self
            .checkpoint
            .node_started(execution_id, node.id, &node.key, 1, Some(audit_input), started_at)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    node_key = %node.key,
                    error = %e,
                    "could not open node audit record"
                );
                return finished(
                    &node,
                    None,
                    ActivityOutcome::Failed {
                        error: format!("audit record could not be written: {e}"),
                    },
                    started_at,
                    clock,
                );
            }
        };

        let inputs = match resolved {
            Ok(inputs) => ResolvedInputs::new(inputs),
            Err(e) => {
                tracing::debug!(
                    execution_id = %execution_id,
                    node_key = %node.key,
                    error = %e,
                    "template resolution failed"
                );
                return finished(
                    &node,
                    record_id,
                    ActivityOutcome::Failed {
                        error: e.to_string(),
                    },
                    started_at,
                    clock,
                );
            }
        };

        let node_context = NodeContext {
            execution_id,
            workspace_id,
            node_id: node.id,
            node_key: node.key.clone(),
            data: context,
        };

        let timeout = Duration::from_secs(self.options.start_to_close_timeout_secs);
        let outcome = match tokio::time::timeout(
            timeout,
            execute_node(&node.config, &node_context, inputs, &self.services),
        )
        .await
        {
            Ok(Ok(NodeExecution::Completed(output))) => ActivityOutcome::Completed(output),
            Ok(Ok(NodeExecution::Skipped { reason })) => ActivityOutcome::Skipped { reason },
            Ok(Err(e)) => ActivityOutcome::Failed {
                error: e.to_string(),
            },
            Err(_elapsed) => ActivityOutcome::Failed {
                error: format!(
                    "node timed out after {}s",
                    self.options.start_to_close_timeout_secs
                ),
            },
        };

        tracing::debug!(
            execution_id = %execution_id,
            node_key = %node.key,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "node activity finished"
        );
        finished(&node, record_id, outcome, started_at, clock)
    }
}

fn resolve_inputs(
    templates: &Map<String, Value>,
    context: &Value,
) -> Result<Map<String, Value>, TemplateError> {
    templates
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve_value(value, context)?)))
        .collect()
}

fn finished(
    node: &WorkflowNode,
    record_id: Option<Uuid>,
    outcome: ActivityOutcome,
    started_at: DateTime<Utc>,
    clock: Instant,
) -> NodeActivityResult {
    NodeActivityResult {
        node_id: node.id,
        node_key: node.key.clone(),
        node_name: node.name.clone(),
        record_id,
        outcome,
        started_at,
        duration_ms: clock.elapsed().as_millis() as u64,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
