//! PostgreSQL admission queue with skip-locked claiming.

use chrono::{DateTime, Utc};
use flowgate_core::repository::queue::ExecutionQueueRepository;
use flowgate_types::error::RepositoryError;
use flowgate_types::output::TriggerContext;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use uuid::Uuid;

use crate::map_sqlx;

pub struct PgQueueRepository {
    pool: PgPool,
}

impl PgQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn transition_error(&self, entry_id: &Uuid, wanted: &str) -> RepositoryError {
        let status: Result<Option<(String,)>, _> =
            sqlx::query_as("SELECT status FROM execution_queue WHERE id = $1")
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await;
        match status {
            Ok(Some((status,))) => RepositoryError::Conflict(format!(
                "queue entry {entry_id} is {status}, cannot mark {wanted}"
            )),
            Ok(None) => RepositoryError::NotFound,
            Err(e) => map_sqlx(e),
        }
    }
}

fn entry_from_row(row: &PgRow) -> Result<ExecutionQueueEntry, RepositoryError> {
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let trigger: Json<TriggerContext> = row.try_get("trigger_context").map_err(map_sqlx)?;
    let claim_count: i32 = row.try_get("claim_count").map_err(map_sqlx)?;

    Ok(ExecutionQueueEntry {
        id: row.try_get("id").map_err(map_sqlx)?,
        workspace_id: row.try_get("workspace_id").map_err(map_sqlx)?,
        definition_version_id: row.try_get("definition_version_id").map_err(map_sqlx)?,
        execution_id: row.try_get("execution_id").map_err(map_sqlx)?,
        status: status.parse().map_err(RepositoryError::Query)?,
        trigger: trigger.0,
        claim_count: claim_count as u32,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        claimed_at: row.try_get("claimed_at").map_err(map_sqlx)?,
        completed_at: row.try_get("completed_at").map_err(map_sqlx)?,
        last_error: row.try_get("last_error").map_err(map_sqlx)?,
    })
}

impl ExecutionQueueRepository for PgQueueRepository {
    async fn enqueue(&self, entry: &ExecutionQueueEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO execution_queue
               (id, workspace_id, definition_version_id, status, trigger_context,
                claim_count, created_at)
               VALUES ($1, $2, $3, 'pending', $4, 0, $5)"#,
        )
        .bind(entry.id)
        .bind(entry.workspace_id)
        .bind(entry.definition_version_id)
        .bind(Json(&entry.trigger))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn claim_pending(
        &self,
        batch_size: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"SELECT id FROM execution_queue
               WHERE status = 'pending'
               ORDER BY created_at ASC, id ASC
               LIMIT $1
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(batch_size as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if ids.is_empty() {
            tx.commit().await.map_err(map_sqlx)?;
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.into_iter().map(|r| r.0).collect();

        let rows = sqlx::query(
            r#"UPDATE execution_queue
               SET status = 'claimed', claimed_at = now(), claim_count = claim_count + 1
               WHERE id = ANY($1)
               RETURNING *"#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        let mut entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn mark_dispatched(
        &self,
        entry_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE execution_queue SET status = 'dispatched', execution_id = $1
               WHERE id = $2 AND status = 'claimed'"#,
        )
        .bind(execution_id)
        .bind(entry_id)
        .execute(&self.pool)
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
               SET status = $1, execution_id = COALESCE(execution_id, $2), last_error = $3,
                   completed_at = now()
               WHERE id = $4 AND status IN ('claimed', 'dispatched')"#,
        )
        .bind(status.as_str())
        .bind(execution_id.copied())
        .bind(error)
        .bind(entry_id)
        .execute(&self.pool)
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
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"UPDATE execution_queue
               SET status = 'pending', claimed_at = NULL
               WHERE id IN (
                   SELECT id FROM execution_queue
                   WHERE status = 'claimed' AND claimed_at < $1
                   ORDER BY claimed_at ASC
                   LIMIT $2
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING id"#,
        )
        .bind(claimed_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn get(&self, entry_id: &Uuid) -> Result<Option<ExecutionQueueEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM execution_queue WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list(
        &self,
        workspace_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM execution_queue
               WHERE $1::uuid IS NULL OR workspace_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2"#,
        )
        .bind(workspace_id.copied())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(entry_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
