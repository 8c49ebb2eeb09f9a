//! Workflow definition types.
//!
//! A `WorkflowDefinitionVersion` is an immutable DAG snapshot: the nodes of a
//! workflow plus the edges between them. It is validated once when published
//! and then executed any number of times without re-validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::{NodeCategory, NodeConfig};

// ---------------------------------------------------------------------------
// Definition version
// ---------------------------------------------------------------------------

/// Immutable snapshot of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinitionVersion {
    /// UUIDv7 of this version.
    pub id: Uuid,
    /// Stable id shared by every version of the same workflow.
    pub workflow_id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic version number within `workflow_id`.
    pub version: u32,
    /// Nodes in authoring order.
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    pub published_at: DateTime<Utc>,
}

impl WorkflowDefinitionVersion {
    pub fn node(&self, id: &Uuid) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn node_by_key(&self, key: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.key == key)
    }

    /// Trigger nodes: graph entry points that are never executed.
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter().filter(|n| n.config.is_trigger())
    }
}

/// A single node in the workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: Uuid,
    /// Author-chosen key, unique within a definition. Templates address
    /// step outputs by key (`{{ steps.<key>.output... }}`).
    pub key: String,
    pub name: String,
    /// Schema version of `config`.
    #[serde(default = "default_node_version")]
    pub version: u32,
    pub config: NodeConfig,
}

fn default_node_version() -> u32 {
    1
}

impl WorkflowNode {
    pub fn category(&self) -> NodeCategory {
        self.config.category()
    }
}

/// Directed dependency: `target` may start only after `source` completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: Uuid,
    pub target: Uuid,
}
