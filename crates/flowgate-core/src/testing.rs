//! In-memory repository and collaborator doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use flowgate_types::entity::{EntityRecord, QueryFilter};
use flowgate_types::error::RepositoryError;
use flowgate_types::execution::{WorkflowExecution, WorkflowExecutionNode};
use flowgate_types::node::{NodeConfig, TriggerConfig, UtilityConfig};
use flowgate_types::output::TriggerContext;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};
use flowgate_types::state::{RecordedEvent, WorkflowState};
use flowgate_types::workflow::{WorkflowDefinitionVersion, WorkflowEdge, WorkflowNode};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::queue::ExecutionQueueRepository;
use crate::repository::workflow::{NodeCompletion, WorkflowRepository};
use crate::workflow::node::{EntityFuture, EntityMutationService, EntityServiceError};

// ---------------------------------------------------------------------------
// Workflow repository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WorkflowStore {
    definitions: Vec<WorkflowDefinitionVersion>,
    executions: HashMap<Uuid, WorkflowExecution>,
    nodes: Vec<WorkflowExecutionNode>,
    events: Vec<RecordedEvent>,
}

#[derive(Default)]
pub struct MemoryWorkflowRepository {
    store: Mutex<WorkflowStore>,
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn save_definition_version(
        &self,
        def: &WorkflowDefinitionVersion,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        if store.definitions.iter().any(|d| {
            d.id == def.id || (d.workflow_id == def.workflow_id && d.version == def.version)
        }) {
            return Err(RepositoryError::Conflict("definition version exists".to_string()));
        }
        store.definitions.push(def.clone());
        Ok(())
    }

    async fn get_definition_version(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinitionVersion>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store.definitions.iter().find(|d| &d.id == id).cloned())
    }

    async fn latest_version_number(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Option<u32>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .definitions
            .iter()
            .filter(|d| &d.workflow_id == workflow_id)
            .map(|d| d.version)
            .max())
    }

    async fn list_definition_versions(
        &self,
        workspace_id: &Uuid,
    ) -> Result<Vec<WorkflowDefinitionVersion>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut defs: Vec<_> = store
            .definitions
            .iter()
            .filter(|d| &d.workspace_id == workspace_id)
            .cloned()
            .collect();
        defs.reverse();
        Ok(defs)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        store.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution_state(
        &self,
        execution_id: &Uuid,
        state: &WorkflowState,
        completed_at: Option<DateTime<Utc>>,
        registry: Option<&Value>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let execution = store
            .executions
            .get_mut(execution_id)
            .ok_or(RepositoryError::NotFound)?;
        execution.state = state.clone();
        if completed_at.is_some() {
            execution.completed_at = completed_at;
        }
        if let Some(registry) = registry {
            execution.registry = registry.clone();
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.store.lock().unwrap().executions.get(execution_id).cloned())
    }

    async fn list_executions(
        &self,
        workspace_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut list: Vec<_> = store
            .executions
            .values()
            .filter(|e| &e.workspace_id == workspace_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list.truncate(limit as usize);
        Ok(list)
    }

    async fn create_node_execution(
        &self,
        record: &WorkflowExecutionNode,
    ) -> Result<(), RepositoryError> {
        self.store.lock().unwrap().nodes.push(record.clone());
        Ok(())
    }

    async fn complete_node_execution(
        &self,
        record_id: &Uuid,
        completion: NodeCompletion<'_>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let record = store
            .nodes
            .iter_mut()
            .find(|n| &n.id == record_id)
            .ok_or(RepositoryError::NotFound)?;
        if record.status.is_terminal() {
            return Err(RepositoryError::Conflict("node record already final".to_string()));
        }
        record.status = completion.status;
        record.output = completion.output.cloned();
        record.error = completion.error.map(str::to_string);
        record.completed_at = Some(completion.completed_at);
        record.duration_ms = Some(completion.duration_ms);
        Ok(())
    }

    async fn list_node_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowExecutionNode>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .nodes
            .iter()
            .filter(|n| &n.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn append_event(&self, event: &RecordedEvent) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        if store
            .events
            .iter()
            .any(|e| e.execution_id == event.execution_id && e.sequence == event.sequence)
        {
            return Err(RepositoryError::Conflict("duplicate event sequence".to_string()));
        }
        store.events.push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<RecordedEvent>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut events: Vec<_> = store
            .events
            .iter()
            .filter(|e| &e.execution_id == execution_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Queue repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryQueueRepository {
    rows: Mutex<Vec<ExecutionQueueEntry>>,
    /// Rows whose status updates fail with `Connection`.
    unreachable: Mutex<HashSet<Uuid>>,
}

impl MemoryQueueRepository {
    /// Make `mark_dispatched` and `mark_terminal` fail for one row.
    pub fn fail_updates_for(&self, entry_id: Uuid) {
        self.unreachable.lock().unwrap().insert(entry_id);
    }

    fn check_reachable(&self, entry_id: &Uuid) -> Result<(), RepositoryError> {
        if self.unreachable.lock().unwrap().contains(entry_id) {
            return Err(RepositoryError::Connection);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<ExecutionQueueEntry> {
        self.rows.lock().unwrap().clone()
    }

    /// Backdate a row's claim timestamp.
    pub fn set_claimed_at(&self, entry_id: &Uuid, claimed_at: DateTime<Utc>) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| &r.id == entry_id) {
            row.claimed_at = Some(claimed_at);
        }
    }
}

impl ExecutionQueueRepository for MemoryQueueRepository {
    async fn enqueue(&self, entry: &ExecutionQueueEntry) -> Result<(), RepositoryError> {
        self.rows.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn claim_pending(
        &self,
        batch_size: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        rows.sort_by_key(|r| r.created_at);
        let now = Utc::now();
        let mut claimed = Vec::new();
        for row in rows
            .iter_mut()
            .filter(|r| r.status == QueueStatus::Pending)
            .take(batch_size as usize)
        {
            row.status = QueueStatus::Claimed;
            row.claimed_at = Some(now);
            row.claim_count += 1;
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn mark_dispatched(
        &self,
        entry_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        self.check_reachable(entry_id)?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| &r.id == entry_id)
            .ok_or(RepositoryError::NotFound)?;
        if row.status != QueueStatus::Claimed {
            return Err(RepositoryError::Conflict(format!("entry is {}", row.status)));
        }
        row.status = QueueStatus::Dispatched;
        row.execution_id = Some(*execution_id);
        Ok(())
    }

    async fn mark_terminal(
        &self,
        entry_id: &Uuid,
        status: QueueStatus,
        execution_id: Option<&Uuid>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.check_reachable(entry_id)?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| &r.id == entry_id)
            .ok_or(RepositoryError::NotFound)?;
        if !matches!(row.status, QueueStatus::Claimed | QueueStatus::Dispatched) {
            return Err(RepositoryError::Conflict(format!("entry is {}", row.status)));
        }
        row.status = status;
        if row.execution_id.is_none() {
            row.execution_id = execution_id.copied();
        }
        row.last_error = error.map(str::to_string);
        row.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let mut reset = Vec::new();
        for row in rows
            .iter_mut()
            .filter(|r| {
                r.status == QueueStatus::Claimed
                    && r.claimed_at.is_some_and(|at| at < claimed_before)
            })
            .take(limit as usize)
        {
            row.status = QueueStatus::Pending;
            row.claimed_at = None;
            reset.push(row.id);
        }
        Ok(reset)
    }

    async fn get(&self, entry_id: &Uuid) -> Result<Option<ExecutionQueueEntry>, RepositoryError> {
        Ok(self.rows.lock().unwrap().iter().find(|r| &r.id == entry_id).cloned())
    }

    async fn list(
        &self,
        workspace_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        let rows = self.rows.lock().unwrap();
        let mut list: Vec<_> = rows
            .iter()
            .filter(|r| workspace_id.is_none_or(|w| &r.workspace_id == w))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit as usize);
        Ok(list)
    }
}

// ---------------------------------------------------------------------------
// Entity service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryEntities {
    records: Mutex<HashMap<Uuid, EntityRecord>>,
    pub reject_with: Option<String>,
}

impl MemoryEntities {
    pub fn rejecting(reason: &str) -> Self {
        Self {
            reject_with: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl EntityMutationService for MemoryEntities {
    fn create<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        payload: Value,
    ) -> EntityFuture<'a, EntityRecord> {
        Box::pin(async move {
            if let Some(reason) = &self.reject_with {
                return Err(EntityServiceError::Rejected(reason.clone()));
            }
            let record = EntityRecord {
                id: Uuid::now_v7(),
                workspace_id,
                entity_type: entity_type.to_string(),
                data: payload,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.records.lock().unwrap().insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn update<'a>(
        &'a self,
        _workspace_id: Uuid,
        entity_type: &'a str,
        entity_id: Uuid,
        payload: Value,
    ) -> EntityFuture<'a, EntityRecord> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            let record = records
                .get_mut(&entity_id)
                .ok_or_else(|| EntityServiceError::NotFound {
                    entity_type: entity_type.to_string(),
                    id: entity_id,
                })?;
            record.data = payload;
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
    }

    fn delete<'a>(
        &'a self,
        _workspace_id: Uuid,
        _entity_type: &'a str,
        entity_id: Uuid,
    ) -> EntityFuture<'a, bool> {
        Box::pin(async move { Ok(self.records.lock().unwrap().remove(&entity_id).is_some()) })
    }

    fn query<'a>(
        &'a self,
        _workspace_id: Uuid,
        entity_type: &'a str,
        filter: Option<QueryFilter>,
        limit: Option<u32>,
    ) -> EntityFuture<'a, Vec<EntityRecord>> {
        Box::pin(async move {
            let records = self.records.lock().unwrap();
            Ok(records
                .values()
                .filter(|r| r.entity_type == entity_type)
                .filter(|r| filter.as_ref().is_none_or(|f| f.matches(&r.data)))
                .take(limit.map_or(usize::MAX, |l| l as usize))
                .cloned()
                .collect())
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn node(key: &str, config: NodeConfig) -> WorkflowNode {
    WorkflowNode {
        id: Uuid::now_v7(),
        key: key.to_string(),
        name: key.to_string(),
        version: 1,
        config,
    }
}

pub fn manual_trigger(key: &str) -> WorkflowNode {
    node(key, NodeConfig::Trigger(TriggerConfig::Manual {}))
}

pub fn log_node(key: &str, message: &str) -> WorkflowNode {
    node(
        key,
        NodeConfig::Utility(UtilityConfig::Log {
            message: message.to_string(),
            level: Default::default(),
        }),
    )
}

pub fn edge(from: &WorkflowNode, to: &WorkflowNode) -> WorkflowEdge {
    WorkflowEdge {
        source: from.id,
        target: to.id,
    }
}

pub fn definition(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> WorkflowDefinitionVersion {
    WorkflowDefinitionVersion {
        id: Uuid::now_v7(),
        workflow_id: Uuid::now_v7(),
        workspace_id: Uuid::now_v7(),
        name: "test-workflow".to_string(),
        description: None,
        version: 1,
        nodes,
        edges,
        published_at: Utc::now(),
    }
}

pub fn sample_execution() -> WorkflowExecution {
    WorkflowExecution {
        id: Uuid::now_v7(),
        definition_version_id: Uuid::now_v7(),
        workspace_id: Uuid::now_v7(),
        queue_entry_id: None,
        state: WorkflowState::initial(),
        trigger: TriggerContext::manual(Value::Null),
        registry: Value::Null,
        started_at: Utc::now(),
        completed_at: None,
    }
}
