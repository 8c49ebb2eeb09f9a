//! Cycle detection and runtime dependency resolution.
//!
//! `validate_dag` runs once at publish time over the whole graph using
//! `petgraph`'s topological sort. `DependencyResolver` is the per-execution
//! in-degree tracker: it hands out ready batches and never returns the same
//! node twice. Joins are AND-only.

use std::collections::{HashMap, HashSet};

use flowgate_types::workflow::{WorkflowEdge, WorkflowNode};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use uuid::Uuid;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Publish-time validation
// ---------------------------------------------------------------------------

/// Validate that nodes and edges form a DAG (no cycles, all endpoints exist).
pub fn validate_dag(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Result<(), WorkflowError> {
    let id_to_idx: HashMap<Uuid, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id, i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = nodes.iter().map(|n| graph.add_node(n.key.as_str())).collect();

    for edge in edges {
        let from = id_to_idx.get(&edge.source).ok_or_else(|| {
            WorkflowError::UnknownNode(format!("edge source {} does not exist", edge.source))
        })?;
        let to = id_to_idx.get(&edge.target).ok_or_else(|| {
            WorkflowError::UnknownNode(format!("edge target {} does not exist", edge.target))
        })?;
        graph.add_edge(node_indices[*from], node_indices[*to], ());
    }

    toposort(&graph, None).map_err(|cycle| {
        let node_key = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("cycle detected involving node '{node_key}'"))
    })?;

    Ok(())
}

/// Returns the transitive closure of all upstream node ids for `node_id`.
///
/// If `node_id` has no incoming edges (or is unknown), returns an empty set.
pub fn upstream_nodes(node_id: Uuid, edges: &[WorkflowEdge]) -> HashSet<Uuid> {
    let mut predecessors: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges {
        predecessors.entry(edge.target).or_default().push(edge.source);
    }

    let mut visited = HashSet::new();
    let mut stack = vec![node_id];
    while let Some(current) = stack.pop() {
        if let Some(preds) = predecessors.get(&current) {
            for pred in preds {
                if visited.insert(*pred) {
                    stack.push(*pred);
                }
            }
        }
    }
    visited
}

// ---------------------------------------------------------------------------
// Runtime resolver
// ---------------------------------------------------------------------------

/// Errors from the runtime dependency resolver.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// No node has zero in-degree in a non-empty graph.
    #[error("no entry node found: the graph contains a cycle")]
    CycleDetected,

    #[error("edge references unknown node {0}")]
    UnknownNode(Uuid),

    /// Completion reported for a node that was never handed out.
    #[error("node {0} was never ready")]
    NotDispatched(Uuid),

    #[error("node {0} already completed")]
    AlreadyCompleted(Uuid),
}

/// In-degree tracker for one execution.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    /// Node ids in authoring order, so batches are deterministic.
    order: Vec<Uuid>,
    in_degree: HashMap<Uuid, usize>,
    successors: HashMap<Uuid, Vec<Uuid>>,
    dispatched: HashSet<Uuid>,
    completed: HashSet<Uuid>,
}

impl DependencyResolver {
    /// Build the in-degree table. Duplicate edges count once.
    pub fn new(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Result<Self, ResolverError> {
        let order: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let mut in_degree: HashMap<Uuid, usize> = order.iter().map(|id| (*id, 0)).collect();
        let mut successors: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        let mut seen = HashSet::new();
        for edge in edges {
            if !in_degree.contains_key(&edge.source) {
                return Err(ResolverError::UnknownNode(edge.source));
            }
            let Some(degree) = in_degree.get_mut(&edge.target) else {
                return Err(ResolverError::UnknownNode(edge.target));
            };
            if !seen.insert((edge.source, edge.target)) {
                continue;
            }
            *degree += 1;
            successors.entry(edge.source).or_default().push(edge.target);
        }

        Ok(Self {
            order,
            in_degree,
            successors,
            dispatched: HashSet::new(),
            completed: HashSet::new(),
        })
    }

    /// The first ready batch: every node with in-degree zero.
    ///
    /// Fails closed when a non-empty graph has no entry node.
    pub fn initial_ready(&mut self) -> Result<Vec<Uuid>, ResolverError> {
        let ready: Vec<Uuid> = self
            .order
            .iter()
            .filter(|id| self.in_degree.get(id) == Some(&0) && !self.dispatched.contains(id))
            .copied()
            .collect();

        if ready.is_empty() && !self.order.is_empty() && self.dispatched.is_empty() {
            return Err(ResolverError::CycleDetected);
        }

        self.dispatched.extend(ready.iter().copied());
        Ok(ready)
    }

    /// Record a completion and return the successors that just became ready.
    pub fn complete(&mut self, node_id: Uuid) -> Result<Vec<Uuid>, ResolverError> {
        if !self.in_degree.contains_key(&node_id) {
            return Err(ResolverError::UnknownNode(node_id));
        }
        if !self.dispatched.contains(&node_id) {
            return Err(ResolverError::NotDispatched(node_id));
        }
        if !self.completed.insert(node_id) {
            return Err(ResolverError::AlreadyCompleted(node_id));
        }

        let mut ready = Vec::new();
        if let Some(successors) = self.successors.get(&node_id) {
            for succ in successors {
                if let Some(degree) = self.in_degree.get_mut(succ) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 && self.dispatched.insert(*succ) {
                        ready.push(*succ);
                    }
                }
            }
        }

        // Keep batch order stable regardless of edge order.
        ready.sort_by_key(|id| self.position(id));
        Ok(ready)
    }

    /// Every node has completed.
    pub fn is_exhausted(&self) -> bool {
        self.completed.len() == self.order.len()
    }

    /// Nodes handed out but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.dispatched.len() - self.completed.len()
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    fn position(&self, id: &Uuid) -> usize {
        self.order.iter().position(|o| o == id).unwrap_or(usize::MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
