//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `flowgate-core` using sqlx with split
//! read/write pools. Definition versions are stored as JSON blobs; executions
//! keep their `WorkflowState` as JSON next to a `phase` column for listing.

use chrono::{DateTime, Utc};
use flowgate_core::repository::workflow::{NodeCompletion, WorkflowRepository};
use flowgate_types::error::RepositoryError;
use flowgate_types::execution::{NodeExecutionStatus, WorkflowExecution, WorkflowExecutionNode};
use flowgate_types::state::{RecordedEvent, WorkflowState};
use flowgate_types::workflow::WorkflowDefinitionVersion;
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, map_sqlx, parse_datetime, parse_json, parse_uuid, to_json};

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    definition_version_id: String,
    workspace_id: String,
    queue_entry_id: Option<String>,
    state: String,
    trigger_context: String,
    registry: String,
    started_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            definition_version_id: row.try_get("definition_version_id")?,
            workspace_id: row.try_get("workspace_id")?,
            queue_entry_id: row.try_get("queue_entry_id")?,
            state: row.try_get("state")?,
            trigger_context: row.try_get("trigger_context")?,
            registry: row.try_get("registry")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            definition_version_id: parse_uuid(&self.definition_version_id)?,
            workspace_id: parse_uuid(&self.workspace_id)?,
            queue_entry_id: self.queue_entry_id.as_deref().map(parse_uuid).transpose()?,
            state: parse_json(&self.state, "state")?,
            trigger: parse_json(&self.trigger_context, "trigger context")?,
            registry: parse_json(&self.registry, "registry")?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct NodeRow {
    id: String,
    execution_id: String,
    node_id: String,
    node_key: String,
    status: String,
    attempt: i64,
    input: Option<String>,
    output: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
}

impl NodeRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            node_id: row.try_get("node_id")?,
            node_key: row.try_get("node_key")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
        })
    }

    fn into_record(self) -> Result<WorkflowExecutionNode, RepositoryError> {
        let status: NodeExecutionStatus = serde_json::from_value(Value::String(self.status.clone()))
            .map_err(|_| RepositoryError::Query(format!("invalid node status: {}", self.status)))?;

        Ok(WorkflowExecutionNode {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            node_id: parse_uuid(&self.node_id)?,
            node_key: self.node_key,
            status,
            attempt: self.attempt as u32,
            input: self.input.as_deref().map(|s| parse_json(s, "node input")).transpose()?,
            output: self.output.as_deref().map(|s| parse_json(s, "node output")).transpose()?,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            duration_ms: self.duration_ms.map(|d| d as u64),
        })
    }
}

fn definition_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<WorkflowDefinitionVersion, RepositoryError> {
    let definition: String = row.try_get("definition").map_err(map_sqlx)?;
    parse_json(&definition, "workflow definition")
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RecordedEvent, RepositoryError> {
    let execution_id: String = row.try_get("execution_id").map_err(map_sqlx)?;
    let sequence: i64 = row.try_get("sequence").map_err(map_sqlx)?;
    let event: String = row.try_get("event").map_err(map_sqlx)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(map_sqlx)?;
    Ok(RecordedEvent {
        execution_id: parse_uuid(&execution_id)?,
        sequence: sequence as u64,
        event: parse_json(&event, "workflow event")?,
        recorded_at: parse_datetime(&recorded_at)?,
    })
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition_version(
        &self,
        def: &WorkflowDefinitionVersion,
    ) -> Result<(), RepositoryError> {
        let definition_json = to_json(def, "definition")?;

        sqlx::query(
            r#"INSERT INTO workflow_definition_versions
               (id, workflow_id, workspace_id, name, version, definition, published_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(def.workflow_id.to_string())
        .bind(def.workspace_id.to_string())
        .bind(&def.name)
        .bind(def.version as i64)
        .bind(&definition_json)
        .bind(format_datetime(&def.published_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn get_definition_version(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinitionVersion>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflow_definition_versions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        row.as_ref().map(definition_from_row).transpose()
    }

    async fn latest_version_number(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Option<u32>, RepositoryError> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(version) FROM workflow_definition_versions WHERE workflow_id = ?",
        )
        .bind(workflow_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        Ok(row.0.map(|v| v as u32))
    }

    async fn list_definition_versions(
        &self,
        workspace_id: &Uuid,
    ) -> Result<Vec<WorkflowDefinitionVersion>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT definition FROM workflow_definition_versions WHERE workspace_id = ?
               ORDER BY published_at DESC, version DESC"#,
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(definition_from_row).collect()
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, definition_version_id, workspace_id, queue_entry_id, phase, state,
                trigger_context, registry, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.definition_version_id.to_string())
        .bind(execution.workspace_id.to_string())
        .bind(execution.queue_entry_id.map(|id| id.to_string()))
        .bind(execution.state.phase.as_str())
        .bind(to_json(&execution.state, "state")?)
        .bind(to_json(&execution.trigger, "trigger context")?)
        .bind(to_json(&execution.registry, "registry")?)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn update_execution_state(
        &self,
        execution_id: &Uuid,
        state: &WorkflowState,
        completed_at: Option<DateTime<Utc>>,
        registry: Option<&Value>,
    ) -> Result<(), RepositoryError> {
        let registry_json = registry.map(|r| to_json(r, "registry")).transpose()?;

        let result = sqlx::query(
            r#"UPDATE workflow_executions
               SET phase = ?, state = ?,
                   completed_at = COALESCE(?, completed_at),
                   registry = COALESCE(?, registry)
               WHERE id = ?"#,
        )
        .bind(state.phase.as_str())
        .bind(to_json(state, "state")?)
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(registry_json)
        .bind(execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row).map_err(map_sqlx)?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn list_executions(
        &self,
        workspace_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions WHERE workspace_id = ?
               ORDER BY started_at DESC, id DESC LIMIT ?"#,
        )
        .bind(workspace_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row).map_err(map_sqlx)?;
            executions.push(r.into_execution()?);
        }
        Ok(executions)
    }

    async fn create_node_execution(
        &self,
        record: &WorkflowExecutionNode,
    ) -> Result<(), RepositoryError> {
        let input = record.input.as_ref().map(|v| to_json(v, "node input")).transpose()?;
        let output = record.output.as_ref().map(|v| to_json(v, "node output")).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_execution_nodes
               (id, execution_id, node_id, node_key, status, attempt, input, output, error,
                started_at, completed_at, duration_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.to_string())
        .bind(record.node_id.to_string())
        .bind(&record.node_key)
        .bind(record.status.as_str())
        .bind(record.attempt as i64)
        .bind(input)
        .bind(output)
        .bind(&record.error)
        .bind(format_datetime(&record.started_at))
        .bind(record.completed_at.as_ref().map(format_datetime))
        .bind(record.duration_ms.map(|d| d as i64))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn complete_node_execution(
        &self,
        record_id: &Uuid,
        completion: NodeCompletion<'_>,
    ) -> Result<(), RepositoryError> {
        let output = completion.output.map(|v| to_json(v, "node output")).transpose()?;

        let result = sqlx::query(
            r#"UPDATE workflow_execution_nodes
               SET status = ?, output = ?, error = ?, completed_at = ?, duration_ms = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(completion.status.as_str())
        .bind(output)
        .bind(completion.error)
        .bind(format_datetime(&completion.completed_at))
        .bind(completion.duration_ms as i64)
        .bind(record_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM workflow_execution_nodes WHERE id = ?")
                .bind(record_id.to_string())
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(map_sqlx)?;

        match status {
            Some((status,)) => Err(RepositoryError::Conflict(format!(
                "node execution {record_id} already {status}"
            ))),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_node_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowExecutionNode>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_execution_nodes WHERE execution_id = ?
               ORDER BY started_at ASC, id ASC"#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = NodeRow::from_row(row).map_err(map_sqlx)?;
            records.push(r.into_record()?);
        }
        Ok(records)
    }

    async fn append_event(&self, event: &RecordedEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_execution_events
               (execution_id, sequence, event_type, event, recorded_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(event.execution_id.to_string())
        .bind(event.sequence as i64)
        .bind(event.event.name())
        .bind(to_json(&event.event, "workflow event")?)
        .bind(format_datetime(&event.recorded_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn list_events(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<RecordedEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_execution_events WHERE execution_id = ? ORDER BY sequence ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(event_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use flowgate_types::node::{NodeConfig, TriggerConfig, UtilityConfig};
    use flowgate_types::output::TriggerContext;
    use flowgate_types::state::{WorkflowEvent, WorkflowPhase};
    use flowgate_types::workflow::{WorkflowEdge, WorkflowNode};
    use serde_json::json;

    fn sample_definition(workflow_id: Uuid, version: u32) -> WorkflowDefinitionVersion {
        let start = WorkflowNode {
            id: Uuid::now_v7(),
            key: "start".to_string(),
            name: "Start".to_string(),
            version: 1,
            config: NodeConfig::Trigger(TriggerConfig::Manual {}),
        };
        let note = WorkflowNode {
            id: Uuid::now_v7(),
            key: "note".to_string(),
            name: "Note".to_string(),
            version: 1,
            config: NodeConfig::Utility(UtilityConfig::Log {
                message: "{{ trigger.payload.title }}".to_string(),
                level: Default::default(),
            }),
        };
        WorkflowDefinitionVersion {
            id: Uuid::now_v7(),
            workflow_id,
            workspace_id: Uuid::nil(),
            name: "triage".to_string(),
            description: Some("Route new tickets".to_string()),
            version,
            edges: vec![WorkflowEdge {
                source: start.id,
                target: note.id,
            }],
            nodes: vec![start, note],
            published_at: Utc::now(),
        }
    }

    fn sample_execution(def: &WorkflowDefinitionVersion) -> WorkflowExecution {
        WorkflowExecution {
            id: Uuid::now_v7(),
            definition_version_id: def.id,
            workspace_id: def.workspace_id,
            queue_entry_id: None,
            state: WorkflowState::initial(),
            trigger: TriggerContext::manual(json!({"title": "printer on fire"})),
            registry: Value::Null,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn running_node(execution_id: Uuid, key: &str) -> WorkflowExecutionNode {
        WorkflowExecutionNode {
            id: Uuid::now_v7(),
            execution_id,
            node_id: Uuid::now_v7(),
            node_key: key.to_string(),
            status: NodeExecutionStatus::Running,
            attempt: 1,
            input: Some(json!({"message": "printer on fire"})),
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    async fn seeded() -> (SqliteWorkflowRepository, WorkflowDefinitionVersion, WorkflowExecution) {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition(Uuid::now_v7(), 1);
        repo.save_definition_version(&def).await.unwrap();
        let execution = sample_execution(&def);
        repo.create_execution(&execution).await.unwrap();
        (repo, def, execution)
    }

    // -- Definitions --

    #[tokio::test]
    async fn test_save_and_get_definition_version() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition(Uuid::now_v7(), 1);
        repo.save_definition_version(&def).await.unwrap();

        let loaded = repo.get_definition_version(&def.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "triage");
        assert_eq!(loaded.nodes, def.nodes);
        assert_eq!(loaded.edges, def.edges);
        assert!(repo.get_definition_version(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_definition_versions_are_immutable() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let workflow_id = Uuid::now_v7();
        let def = sample_definition(workflow_id, 1);
        repo.save_definition_version(&def).await.unwrap();

        let same_id = repo.save_definition_version(&def).await.unwrap_err();
        assert!(matches!(same_id, RepositoryError::Conflict(_)));

        let same_version = sample_definition(workflow_id, 1);
        let err = repo.save_definition_version(&same_version).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_latest_version_and_listing() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let workflow_id = Uuid::now_v7();
        assert_eq!(repo.latest_version_number(&workflow_id).await.unwrap(), None);

        for version in 1..=3 {
            repo.save_definition_version(&sample_definition(workflow_id, version))
                .await
                .unwrap();
        }
        assert_eq!(repo.latest_version_number(&workflow_id).await.unwrap(), Some(3));

        let listed = repo.list_definition_versions(&Uuid::nil()).await.unwrap();
        let versions: Vec<u32> = listed.iter().map(|d| d.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
        assert!(repo.list_definition_versions(&Uuid::now_v7()).await.unwrap().is_empty());
    }

    // -- Executions --

    #[tokio::test]
    async fn test_create_and_get_execution() {
        let (repo, def, execution) = seeded().await;

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.definition_version_id, def.id);
        assert_eq!(loaded.state, WorkflowState::initial());
        assert_eq!(loaded.trigger, execution.trigger);
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_execution_requires_definition() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition(Uuid::now_v7(), 1);
        let err = repo.create_execution(&sample_execution(&def)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Query(_)));
    }

    #[tokio::test]
    async fn test_update_execution_state() {
        let (repo, _def, execution) = seeded().await;

        let mut state = WorkflowState::initial();
        state.phase = WorkflowPhase::ExecutingNodes;
        repo.update_execution_state(&execution.id, &state, None, None)
            .await
            .unwrap();
        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.state.phase, WorkflowPhase::ExecutingNodes);
        assert_eq!(loaded.registry, Value::Null);

        state.phase = WorkflowPhase::Completed;
        let registry = json!({"steps": {"note": {"status": "completed"}}});
        repo.update_execution_state(&execution.id, &state, Some(Utc::now()), Some(&registry))
            .await
            .unwrap();
        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert!(loaded.state.is_terminal());
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.registry, registry);
    }

    #[tokio::test]
    async fn test_update_missing_execution() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let err = repo
            .update_execution_state(&Uuid::now_v7(), &WorkflowState::initial(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_executions_newest_first() {
        let (repo, def, first) = seeded().await;
        let second = sample_execution(&def);
        repo.create_execution(&second).await.unwrap();

        let listed = repo.list_executions(&def.workspace_id, 10).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert_eq!(repo.list_executions(&def.workspace_id, 1).await.unwrap().len(), 1);
    }

    // -- Node audit --

    #[tokio::test]
    async fn test_node_execution_finalized_once() {
        let (repo, _def, execution) = seeded().await;
        let record = running_node(execution.id, "note");
        repo.create_node_execution(&record).await.unwrap();

        let output = json!({"logged": true});
        repo.complete_node_execution(
            &record.id,
            NodeCompletion {
                status: NodeExecutionStatus::Completed,
                output: Some(&output),
                error: None,
                completed_at: Utc::now(),
                duration_ms: 12,
            },
        )
        .await
        .unwrap();

        let again = repo
            .complete_node_execution(
                &record.id,
                NodeCompletion {
                    status: NodeExecutionStatus::Failed,
                    output: None,
                    error: Some("late"),
                    completed_at: Utc::now(),
                    duration_ms: 99,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(again, RepositoryError::Conflict(_)));

        let records = repo.list_node_executions(&execution.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, NodeExecutionStatus::Completed);
        assert_eq!(records[0].output, Some(output));
        assert_eq!(records[0].input, record.input);
        assert_eq!(records[0].duration_ms, Some(12));
        assert!(records[0].error.is_none());
    }

    #[tokio::test]
    async fn test_complete_unknown_node_execution() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let err = repo
            .complete_node_execution(
                &Uuid::now_v7(),
                NodeCompletion {
                    status: NodeExecutionStatus::Failed,
                    output: None,
                    error: Some("boom"),
                    completed_at: Utc::now(),
                    duration_ms: 1,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_failed_node_keeps_error_verbatim() {
        let (repo, _def, execution) = seeded().await;
        let record = running_node(execution.id, "create");
        repo.create_node_execution(&record).await.unwrap();

        repo.complete_node_execution(
            &record.id,
            NodeCompletion {
                status: NodeExecutionStatus::Failed,
                output: None,
                error: Some("ticket: title is required"),
                completed_at: Utc::now(),
                duration_ms: 3,
            },
        )
        .await
        .unwrap();

        let records = repo.list_node_executions(&execution.id).await.unwrap();
        assert_eq!(records[0].error.as_deref(), Some("ticket: title is required"));
        assert!(records[0].output.is_none());
    }

    // -- Events --

    #[tokio::test]
    async fn test_event_log_ordered_and_unique() {
        let (repo, _def, execution) = seeded().await;
        let node_id = Uuid::now_v7();
        let events = [
            WorkflowEvent::NodesReady {
                node_ids: vec![node_id],
            },
            WorkflowEvent::NodeCompleted { node_id },
            WorkflowEvent::AllNodesCompleted,
        ];
        for (i, event) in events.iter().enumerate().rev() {
            repo.append_event(&RecordedEvent {
                execution_id: execution.id,
                sequence: i as u64 + 1,
                event: event.clone(),
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let log = repo.list_events(&execution.id).await.unwrap();
        let sequences: Vec<u64> = log.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(log[2].event, WorkflowEvent::AllNodesCompleted);

        let dup = repo
            .append_event(&RecordedEvent {
                execution_id: execution.id,
                sequence: 2,
                event: WorkflowEvent::AllNodesCompleted,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(dup, RepositoryError::Conflict(_)));
    }
}
