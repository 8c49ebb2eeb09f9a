//! SQLite admission queue.
//!
//! Used when no PostgreSQL queue is configured. SQLite has no row locks, so
//! claiming is a single `UPDATE ... WHERE id IN (SELECT ... LIMIT n)
//! RETURNING` statement on the writer connection: the statement runs under
//! SQLite's exclusive write lock and a row moved to `claimed` is invisible to
//! every later claim.

use chrono::{DateTime, Utc};
use flowgate_core::repository::queue::ExecutionQueueRepository;
use flowgate_types::error::RepositoryError;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, map_sqlx, parse_datetime, parse_json, parse_uuid, to_json};

pub struct SqliteQueueRepository {
    pool: DatabasePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, entry_id: &Uuid) -> Result<Option<String>, RepositoryError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM execution_queue WHERE id = ?")
                .bind(entry_id.to_string())
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(map_sqlx)?;
        Ok(row.map(|r| r.0))
    }

    /// `NotFound` for a missing row, otherwise a `Conflict` naming its status.
    async fn transition_error(&self, entry_id: &Uuid, wanted: &str) -> RepositoryError {
        match self.current_status(entry_id).await {
            Ok(Some(status)) => RepositoryError::Conflict(format!(
                "queue entry {entry_id} is {status}, cannot mark {wanted}"
            )),
            Ok(None) => RepositoryError::NotFound,
            Err(e) => e,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct QueueRow {
    id: String,
    workspace_id: String,
    definition_version_id: String,
    execution_id: Option<String>,
    status: String,
    trigger_context: String,
    claim_count: i64,
    created_at: String,
    claimed_at: Option<String>,
    completed_at: Option<String>,
    last_error: Option<String>,
}

impl QueueRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            definition_version_id: row.try_get("definition_version_id")?,
            execution_id: row.try_get("execution_id")?,
            status: row.try_get("status")?,
            trigger_context: row.try_get("trigger_context")?,
            claim_count: row.try_get("claim_count")?,
            created_at: row.try_get("created_at")?,
            claimed_at: row.try_get("claimed_at")?,
            completed_at: row.try_get("completed_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn into_entry(self) -> Result<ExecutionQueueEntry, RepositoryError> {
        Ok(ExecutionQueueEntry {
            id: parse_uuid(&self.id)?,
            workspace_id: parse_uuid(&self.workspace_id)?,
            definition_version_id: parse_uuid(&self.definition_version_id)?,
            execution_id: self.execution_id.as_deref().map(parse_uuid).transpose()?,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            trigger: parse_json(&self.trigger_context, "trigger context")?,
            claim_count: self.claim_count as u32,
            created_at: parse_datetime(&self.created_at)?,
            claimed_at: self.claimed_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            last_error: self.last_error,
        })
    }
}

fn entries_from_rows(
    rows: &[sqlx::sqlite::SqliteRow],
) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let r = QueueRow::from_row(row).map_err(map_sqlx)?;
        entries.push(r.into_entry()?);
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// ExecutionQueueRepository impl
// ---------------------------------------------------------------------------

impl ExecutionQueueRepository for SqliteQueueRepository {
    async fn enqueue(&self, entry: &ExecutionQueueEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO execution_queue
               (id, workspace_id, definition_version_id, execution_id, status, trigger_context,
                claim_count, created_at, claimed_at, completed_at, last_error)
               VALUES (?, ?, ?, NULL, 'pending', ?, 0, ?, NULL, NULL, NULL)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.workspace_id.to_string())
        .bind(entry.definition_version_id.to_string())
        .bind(to_json(&entry.trigger, "trigger context")?)
        .bind(format_datetime(&entry.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn claim_pending(
        &self,
        batch_size: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"UPDATE execution_queue
               SET status = 'claimed', claimed_at = ?, claim_count = claim_count + 1
               WHERE id IN (
                   SELECT id FROM execution_queue
                   WHERE status = 'pending'
                   ORDER BY created_at ASC, id ASC
                   LIMIT ?
               )
               RETURNING *"#,
        )
        .bind(format_datetime(&Utc::now()))
        .bind(batch_size as i64)
        .fetch_all(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        // RETURNING order is unspecified.
        let mut entries = entries_from_rows(&rows)?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn mark_dispatched(
        &self,
        entry_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE execution_queue SET status = 'dispatched', execution_id = ?
               WHERE id = ? AND status = 'claimed'"#,
        )
        .bind(execution_id.to_string())
        .bind(entry_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(entry_id, "dispatched").await);
        }
        Ok(())
    }

    async fn mark_terminal(
        &self,
        entry_id: &Uuid,
        status: QueueStatus,
        execution_id: Option<&Uuid>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if !status.is_terminal() {
            return Err(RepositoryError::Query(format!("{status} is not a terminal queue status")));
        }

        let result = sqlx::query(
            r#"UPDATE execution_queue
               SET status = ?, execution_id = COALESCE(execution_id, ?), last_error = ?,
                   completed_at = ?
               WHERE id = ? AND status IN ('claimed', 'dispatched')"#,
        )
        .bind(status.as_str())
        .bind(execution_id.map(|id| id.to_string()))
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(entry_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(entry_id, status.as_str()).await);
        }
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"UPDATE execution_queue
               SET status = 'pending', claimed_at = NULL
               WHERE id IN (
                   SELECT id FROM execution_queue
                   WHERE status = 'claimed' AND claimed_at < ?
                   ORDER BY claimed_at ASC
                   LIMIT ?
               )
               RETURNING id"#,
        )
        .bind(format_datetime(&claimed_before))
        .bind(limit as i64)
        .fetch_all(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(|r| parse_uuid(&r.0)).collect()
    }

    async fn get(&self, entry_id: &Uuid) -> Result<Option<ExecutionQueueEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM execution_queue WHERE id = ?")
            .bind(entry_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => {
                let r = QueueRow::from_row(&row).map_err(map_sqlx)?;
                Ok(Some(r.into_entry()?))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        workspace_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        let rows = match workspace_id {
            Some(ws) => {
                sqlx::query(
                    r#"SELECT * FROM execution_queue WHERE workspace_id = ?
                       ORDER BY created_at DESC, id DESC LIMIT ?"#,
                )
                .bind(ws.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM execution_queue ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(map_sqlx)?;

        entries_from_rows(&rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
