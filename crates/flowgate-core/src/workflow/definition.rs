//! Workflow definition loading, publish-time validation and publishing.
//!
//! Authors write definitions as YAML or JSON documents that name nodes by
//! key and connect them with `from`/`to` edges. A document becomes an
//! immutable `WorkflowDefinitionVersion` once it has been validated: the
//! structure, the graph, every template reference and every node
//! configuration are checked here and never again per run.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use flowgate_types::error::RepositoryError;
use flowgate_types::node::{CURRENT_NODE_SCHEMA_VERSION, FieldError, NodeConfig};
use flowgate_types::workflow::{WorkflowDefinitionVersion, WorkflowEdge, WorkflowNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::dag::{upstream_nodes, validate_dag};
use super::node::{ServiceProvider, input_templates, validate_node};
use super::template::template_paths;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading, validating or publishing a definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The graph contains a cycle.
    #[error("{0}")]
    CycleDetected(String),

    /// An edge or reference names a node that does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// One or more configuration errors reported by a node's `validate`.
    #[error("node '{node_key}' is misconfigured: {}", join_errors(.errors))]
    InvalidNodeConfig {
        node_key: String,
        errors: Vec<FieldError>,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Authoring document
// ---------------------------------------------------------------------------

/// A definition as written by an author, before ids and a version are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDocument {
    /// Reuse an existing workflow id to publish a new version of it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub edges: Vec<EdgeDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub key: String,
    /// Display name; defaults to the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_node_version")]
    pub version: u32,
    pub config: NodeConfig,
}

fn default_node_version() -> u32 {
    1
}

/// Edge between two node keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDocument {
    pub from: String,
    pub to: String,
}

impl DefinitionDocument {
    /// Assign node ids and build the version record. Node order is kept.
    pub fn into_version(
        self,
        workflow_id: Uuid,
        version: u32,
    ) -> Result<WorkflowDefinitionVersion, WorkflowError> {
        let mut ids: HashMap<String, Uuid> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for doc in self.nodes {
            let id = Uuid::now_v7();
            if ids.insert(doc.key.clone(), id).is_some() {
                return Err(WorkflowError::ValidationError(format!(
                    "duplicate node key: '{}'",
                    doc.key
                )));
            }
            nodes.push(WorkflowNode {
                id,
                name: doc.name.unwrap_or_else(|| doc.key.clone()),
                key: doc.key,
                version: doc.version,
                config: doc.config,
            });
        }

        let lookup = |key: &str| {
            ids.get(key).copied().ok_or_else(|| {
                WorkflowError::UnknownNode(format!("edge references node key '{key}'"))
            })
        };
        let edges = self
            .edges
            .iter()
            .map(|e| {
                Ok(WorkflowEdge {
                    source: lookup(&e.from)?,
                    target: lookup(&e.to)?,
                })
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;

        Ok(WorkflowDefinitionVersion {
            id: Uuid::now_v7(),
            workflow_id,
            workspace_id: self.workspace_id,
            name: self.name,
            description: self.description,
            version,
            nodes,
            edges,
            published_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_definition_yaml(yaml: &str) -> Result<DefinitionDocument, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

pub fn parse_definition_json(json: &str) -> Result<DefinitionDocument, WorkflowError> {
    serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Load a document from disk. `.json` files are parsed as JSON, anything
/// else as YAML.
pub fn load_definition_file(path: &Path) -> Result<DefinitionDocument, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_definition_json(&content),
        _ => parse_definition_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a definition version before it is persisted.
///
/// Checks:
/// - Name is non-empty and at least one node exists
/// - Node ids and keys are unique; keys match `[A-Za-z0-9_-]+`
/// - Node schema versions are supported
/// - Edges join existing nodes, are not self-edges or duplicates, and never
///   point into a trigger
/// - The graph is acyclic
/// - Every `steps.<key>` template names an upstream node
/// - Every node configuration passes its own `validate`
pub fn validate_definition(
    def: &WorkflowDefinitionVersion,
    services: &ServiceProvider,
) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if def.nodes.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one node".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    let mut keys: HashMap<&str, Uuid> = HashMap::new();
    for node in &def.nodes {
        if !seen_ids.insert(node.id) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate node id: {}",
                node.id
            )));
        }
        if !valid_key(&node.key) {
            return Err(WorkflowError::ValidationError(format!(
                "node key '{}' must be non-empty and contain only letters, digits, '_' or '-'",
                node.key
            )));
        }
        if keys.insert(node.key.as_str(), node.id).is_some() {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate node key: '{}'",
                node.key
            )));
        }
        if node.version == 0 || node.version > CURRENT_NODE_SCHEMA_VERSION {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' uses unsupported schema version {}",
                node.key, node.version
            )));
        }
    }

    let mut seen_edges = HashSet::new();
    for edge in &def.edges {
        if edge.source == edge.target {
            return Err(WorkflowError::ValidationError(format!(
                "node {} has an edge to itself",
                edge.source
            )));
        }
        if !seen_edges.insert((edge.source, edge.target)) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate edge {} -> {}",
                edge.source, edge.target
            )));
        }
        if let Some(target) = def.node(&edge.target) {
            if target.config.is_trigger() {
                return Err(WorkflowError::ValidationError(format!(
                    "trigger node '{}' cannot have incoming edges",
                    target.key
                )));
            }
        }
    }

    validate_dag(&def.nodes, &def.edges)?;

    for node in &def.nodes {
        check_references(node, &keys, &def.edges)?;

        let errors = validate_node(&node.config, services);
        if !errors.is_empty() {
            return Err(WorkflowError::InvalidNodeConfig {
                node_key: node.key.clone(),
                errors,
            });
        }
    }

    Ok(())
}

/// Template references of one node must parse and point at upstream steps.
fn check_references(
    node: &WorkflowNode,
    keys: &HashMap<&str, Uuid>,
    edges: &[WorkflowEdge],
) -> Result<(), WorkflowError> {
    let templates = Value::Object(input_templates(&node.config));
    let paths = template_paths(&templates).map_err(|e| WorkflowError::InvalidNodeConfig {
        node_key: node.key.clone(),
        errors: vec![FieldError::new("template", e.to_string())],
    })?;

    let mut upstream = None;
    for path in paths {
        let mut segments = path.split('.');
        if segments.next() != Some("steps") {
            continue;
        }
        let Some(step_key) = segments.next() else {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' references '{path}' without a step key",
                node.key
            )));
        };
        let step_id = keys.get(step_key).ok_or_else(|| {
            WorkflowError::UnknownNode(format!(
                "node '{}' references unknown step '{step_key}'",
                node.key
            ))
        })?;
        let upstream = upstream.get_or_insert_with(|| upstream_nodes(node.id, edges));
        if !upstream.contains(step_id) {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' references step '{step_key}', which is not upstream of it",
                node.key
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Validate a document and persist it as the next version of its workflow.
pub async fn publish_definition<R: WorkflowRepository>(
    repo: &R,
    services: &ServiceProvider,
    doc: DefinitionDocument,
) -> Result<WorkflowDefinitionVersion, WorkflowError> {
    let workflow_id = doc.workflow_id.unwrap_or_else(Uuid::now_v7);
    let version = repo
        .latest_version_number(&workflow_id)
        .await?
        .map_or(1, |v| v + 1);

    let def = doc.into_version(workflow_id, version)?;
    validate_definition(&def, services)?;
    repo.save_definition_version(&def).await?;

    tracing::info!(
        workflow_id = %def.workflow_id,
        definition_version_id = %def.id,
        version = def.version,
        nodes = def.nodes.len(),
        "published workflow definition"
    );
    Ok(def)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
