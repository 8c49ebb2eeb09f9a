//! Capability-scoped collaborators for node execution.
//!
//! Each executable category receives only the services it needs: action
//! nodes get `ActionServices`, control-flow nodes get `ControlServices`.
//! `ServiceProvider` is the publish-time lookup that `validate` consults and
//! the runtime source of those per-category bundles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowgate_types::entity::{EntityRecord, QueryFilter};
use flowgate_types::node::FieldError;
use serde_json::Value;
use uuid::Uuid;

use super::NodeError;
use crate::workflow::expression::ExpressionError;

/// Boxed future returned by entity service calls.
pub type EntityFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EntityServiceError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Entity mutations (action nodes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum EntityServiceError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: String, id: Uuid },

    /// The service refused the request (schema violation, unknown type, ...).
    #[error("{0}")]
    Rejected(String),

    #[error("entity service unavailable: {0}")]
    Unavailable(String),
}

/// Entity CRUD consumed by action nodes.
pub trait EntityMutationService: Send + Sync {
    fn create<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        payload: Value,
    ) -> EntityFuture<'a, EntityRecord>;

    fn update<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        entity_id: Uuid,
        payload: Value,
    ) -> EntityFuture<'a, EntityRecord>;

    /// Returns whether an entity was removed.
    fn delete<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        entity_id: Uuid,
    ) -> EntityFuture<'a, bool>;

    fn query<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        filter: Option<QueryFilter>,
        limit: Option<u32>,
    ) -> EntityFuture<'a, Vec<EntityRecord>>;
}

// ---------------------------------------------------------------------------
// Expressions (control-flow nodes)
// ---------------------------------------------------------------------------

pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` against a JSON object context.
    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError>;

    /// Publish-time syntax check.
    fn check(&self, expression: &str) -> Result<(), ExpressionError>;
}

// ---------------------------------------------------------------------------
// Schemas (publish-time validation only)
// ---------------------------------------------------------------------------

pub trait SchemaValidator: Send + Sync {
    fn knows_entity_type(&self, entity_type: &str) -> bool;

    /// Field errors for a payload. Template-valued fields are not type
    /// checked since their values are only known at run time.
    fn validate_payload(&self, entity_type: &str, payload: &Value) -> Vec<FieldError>;
}

// ---------------------------------------------------------------------------
// Capability bundles
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ActionServices {
    pub entities: Arc<dyn EntityMutationService>,
}

#[derive(Clone)]
pub struct ControlServices {
    pub evaluator: Arc<dyn ExpressionEvaluator>,
}

/// Lookup of every collaborator the engine knows about.
#[derive(Clone, Default)]
pub struct ServiceProvider {
    action: Option<ActionServices>,
    control: Option<ControlServices>,
    schemas: Option<Arc<dyn SchemaValidator>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(mut self, entities: Arc<dyn EntityMutationService>) -> Self {
        self.action = Some(ActionServices { entities });
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.control = Some(ControlServices { evaluator });
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<dyn SchemaValidator>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn action(&self) -> Result<&ActionServices, NodeError> {
        self.action.as_ref().ok_or(NodeError::MissingService("action"))
    }

    pub fn control(&self) -> Result<&ControlServices, NodeError> {
        self.control
            .as_ref()
            .ok_or(NodeError::MissingService("control_flow"))
    }

    pub fn schemas(&self) -> Option<&dyn SchemaValidator> {
        self.schemas.as_deref()
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("action", &self.action.is_some())
            .field("control", &self.control.is_some())
            .field("schemas", &self.schemas.is_some())
            .finish()
    }
}
