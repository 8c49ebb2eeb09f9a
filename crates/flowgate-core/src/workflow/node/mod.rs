//! Node execution contract.
//!
//! Every category validates against the `ServiceProvider` at publish time.
//! Executable categories also implement `ExecutableNode`, receiving inputs
//! whose templates were already resolved and only the capability bundle
//! they declare. `execute_node` is the exhaustive dispatcher over
//! `NodeConfig`: triggers fail fast, and categories without an executor
//! report `Skipped` with a reason.

pub mod action;
pub mod control;
pub mod parse;
pub mod services;
pub mod utility;

use std::future::Future;

use flowgate_types::node::{
    FieldError, FunctionConfig, HumanInteractionConfig, NodeConfig, TriggerConfig,
};
use flowgate_types::output::NodeOutput;
use serde_json::{Map, Value};
use uuid::Uuid;

pub use services::{
    ActionServices, ControlServices, EntityFuture, EntityMutationService, EntityServiceError,
    ExpressionEvaluator, SchemaValidator, ServiceProvider,
};

use super::expression::ExpressionError;
use super::template::contains_template;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Triggers are graph entry points; executing one is a programming error.
    #[error("trigger node '{node_key}' is an entry point and cannot be executed")]
    TriggerNotExecutable { node_key: String },

    #[error("no {0} services are configured")]
    MissingService(&'static str),

    #[error("invalid input '{field}': {message}")]
    InvalidInput { field: String, message: String },

    #[error(transparent)]
    Entity(#[from] EntityServiceError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("parse failed: {0}")]
    Parse(String),
}

impl NodeError {
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Context and inputs
// ---------------------------------------------------------------------------

/// Identity of the node being executed plus the run data it may read.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub execution_id: Uuid,
    pub workspace_id: Uuid,
    pub node_id: Uuid,
    pub node_key: String,
    /// Expression context built from the data registry.
    pub data: Value,
}

/// Node inputs after template resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs(Map<String, Value>);

impl ResolvedInputs {
    pub fn new(inputs: Map<String, Value>) -> Self {
        Self(inputs)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn require(&self, field: &str) -> Result<&Value, NodeError> {
        self.0
            .get(field)
            .ok_or_else(|| NodeError::invalid_input(field, "missing"))
    }

    pub fn require_str(&self, field: &str) -> Result<&str, NodeError> {
        self.require(field)?
            .as_str()
            .ok_or_else(|| NodeError::invalid_input(field, "expected a string"))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Publish-time configuration check, independent of any run.
pub trait ValidateNode {
    fn validate(&self, services: &ServiceProvider) -> Vec<FieldError>;
}

/// A node category that has an executor.
pub trait ExecutableNode: ValidateNode + Sync {
    /// Capability bundle this category needs.
    type Services: Send + Sync;

    /// Configuration values that may carry templates, keyed by input name.
    fn input_templates(&self) -> Map<String, Value>;

    fn execute(
        &self,
        context: &NodeContext,
        inputs: ResolvedInputs,
        services: &Self::Services,
    ) -> impl Future<Output = Result<NodeOutput, NodeError>> + Send;
}

/// Result of a dispatched node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeExecution {
    Completed(NodeOutput),
    /// The category has no executor. Not a failure.
    Skipped { reason: String },
}

/// Template-bearing inputs for any node. Empty for non-executable categories.
pub fn input_templates(config: &NodeConfig) -> Map<String, Value> {
    match config {
        NodeConfig::Action(c) => c.input_templates(),
        NodeConfig::ControlFlow(c) => c.input_templates(),
        NodeConfig::Utility(c) => c.input_templates(),
        NodeConfig::Parse(c) => c.input_templates(),
        NodeConfig::Trigger(_) | NodeConfig::Function(_) | NodeConfig::HumanInteraction(_) => {
            Map::new()
        }
    }
}

/// Validate any node configuration.
pub fn validate_node(config: &NodeConfig, services: &ServiceProvider) -> Vec<FieldError> {
    match config {
        NodeConfig::Trigger(c) => c.validate(services),
        NodeConfig::Action(c) => c.validate(services),
        NodeConfig::ControlFlow(c) => c.validate(services),
        NodeConfig::Function(c) => c.validate(services),
        NodeConfig::Utility(c) => c.validate(services),
        NodeConfig::Parse(c) => c.validate(services),
        NodeConfig::HumanInteraction(c) => c.validate(services),
    }
}

/// Dispatch one node to its category executor.
pub async fn execute_node(
    config: &NodeConfig,
    context: &NodeContext,
    inputs: ResolvedInputs,
    services: &ServiceProvider,
) -> Result<NodeExecution, NodeError> {
    let output = match config {
        NodeConfig::Trigger(_) => {
            tracing::error!(
                execution_id = %context.execution_id,
                node_key = %context.node_key,
                "attempted to execute a trigger node"
            );
            return Err(NodeError::TriggerNotExecutable {
                node_key: context.node_key.clone(),
            });
        }
        NodeConfig::Action(c) => c.execute(context, inputs, services.action()?).await?,
        NodeConfig::ControlFlow(c) => c.execute(context, inputs, services.control()?).await?,
        NodeConfig::Utility(c) => c.execute(context, inputs, &()).await?,
        NodeConfig::Parse(c) => c.execute(context, inputs, &()).await?,
        NodeConfig::Function(c) => {
            return Ok(NodeExecution::Skipped {
                reason: format!("function node '{}' has no executor", c.sub_type()),
            });
        }
        NodeConfig::HumanInteraction(c) => {
            return Ok(NodeExecution::Skipped {
                reason: format!("human interaction node '{}' has no executor", c.sub_type()),
            });
        }
    };
    Ok(NodeExecution::Completed(output))
}

// ---------------------------------------------------------------------------
// Validation for categories without an executor
// ---------------------------------------------------------------------------

const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

impl ValidateNode for TriggerConfig {
    fn validate(&self, services: &ServiceProvider) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match self {
            TriggerConfig::EntityEvent {
                entity_type,
                events,
            } => {
                check_entity_type(entity_type, services, &mut errors);
                if events.is_empty() {
                    errors.push(FieldError::new("events", "at least one event is required"));
                }
            }
            TriggerConfig::Schedule { cron, .. } => {
                if let Err(e) = cron.parse::<croner::Cron>() {
                    errors.push(FieldError::new("cron", format!("invalid cron expression: {e}")));
                }
            }
            TriggerConfig::Webhook { path, method } => {
                if !path.starts_with('/') {
                    errors.push(FieldError::new("path", "must start with '/'"));
                }
                if !HTTP_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                    errors.push(FieldError::new(
                        "method",
                        format!("unsupported HTTP method '{method}'"),
                    ));
                }
            }
            TriggerConfig::Manual {} => {}
        }
        errors
    }
}

impl ValidateNode for FunctionConfig {
    fn validate(&self, _services: &ServiceProvider) -> Vec<FieldError> {
        let FunctionConfig::Script { language, source } = self;
        let mut errors = Vec::new();
        if language.trim().is_empty() {
            errors.push(FieldError::new("language", "must not be empty"));
        }
        if source.trim().is_empty() {
            errors.push(FieldError::new("source", "must not be empty"));
        }
        errors
    }
}

impl ValidateNode for HumanInteractionConfig {
    fn validate(&self, _services: &ServiceProvider) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match self {
            HumanInteractionConfig::Approval { approvers, .. } => {
                if approvers.is_empty() {
                    errors.push(FieldError::new("approvers", "at least one approver is required"));
                }
            }
            HumanInteractionConfig::Form { fields } => {
                if fields.is_empty() {
                    errors.push(FieldError::new("fields", "at least one field is required"));
                }
                let mut seen = std::collections::HashSet::new();
                for (i, field) in fields.iter().enumerate() {
                    if field.name.trim().is_empty() {
                        errors.push(FieldError::new(
                            format!("fields[{i}].name"),
                            "must not be empty",
                        ));
                    } else if !seen.insert(field.name.as_str()) {
                        errors.push(FieldError::new(
                            format!("fields[{i}].name"),
                            format!("duplicate field '{}'", field.name),
                        ));
                    }
                }
            }
        }
        errors
    }
}

/// Shared entity type check for triggers and actions.
pub(crate) fn check_entity_type(
    entity_type: &str,
    services: &ServiceProvider,
    errors: &mut Vec<FieldError>,
) {
    if entity_type.trim().is_empty() {
        errors.push(FieldError::new("entity_type", "must not be empty"));
        return;
    }
    if contains_template(entity_type) {
        errors.push(FieldError::new("entity_type", "must be a literal entity type"));
        return;
    }
    if let Some(schemas) = services.schemas() {
        if !schemas.knows_entity_type(entity_type) {
            errors.push(FieldError::new(
                "entity_type",
                format!("unknown entity type '{entity_type}'"),
            ));
        }
    }
}
