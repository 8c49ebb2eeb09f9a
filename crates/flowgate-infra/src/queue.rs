//! Queue backend selection.
//!
//! The dispatcher is generic over one `ExecutionQueueRepository`; which one
//! is known only after reading the configuration, so `QueueBackend` wraps
//! both and delegates.

use chrono::{DateTime, Utc};
use flowgate_core::repository::queue::ExecutionQueueRepository;
use flowgate_types::error::RepositoryError;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};
use uuid::Uuid;

use crate::postgres::pool::connect_queue_pool;
use crate::postgres::queue::PgQueueRepository;
use crate::sqlite::pool::DatabasePool;
use crate::sqlite::queue::SqliteQueueRepository;

pub enum QueueBackend {
    Sqlite(SqliteQueueRepository),
    Postgres(PgQueueRepository),
}

impl QueueBackend {
    /// PostgreSQL when `queue_url` is set, otherwise the SQLite database.
    pub async fn open(sqlite: &DatabasePool, queue_url: Option<&str>) -> Result<Self, sqlx::Error> {
        match queue_url {
            Some(url) => {
                let pool = connect_queue_pool(url).await?;
                tracing::info!("using postgres admission queue");
                Ok(Self::Postgres(PgQueueRepository::new(pool)))
            }
            None => Ok(Self::Sqlite(SqliteQueueRepository::new(sqlite.clone()))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }
}

impl ExecutionQueueRepository for QueueBackend {
    async fn enqueue(&self, entry: &ExecutionQueueEntry) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(q) => q.enqueue(entry).await,
            Self::Postgres(q) => q.enqueue(entry).await,
        }
    }

    async fn claim_pending(
        &self,
        batch_size: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        match self {
            Self::Sqlite(q) => q.claim_pending(batch_size).await,
            Self::Postgres(q) => q.claim_pending(batch_size).await,
        }
    }

    async fn mark_dispatched(
        &self,
        entry_id: &Uuid,
        execution_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(q) => q.mark_dispatched(entry_id, execution_id).await,
            Self::Postgres(q) => q.mark_dispatched(entry_id, execution_id).await,
        }
    }

    async fn mark_terminal(
        &self,
        entry_id: &Uuid,
        status: QueueStatus,
        execution_id: Option<&Uuid>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(q) => q.mark_terminal(entry_id, status, execution_id, error).await,
            Self::Postgres(q) => q.mark_terminal(entry_id, status, execution_id, error).await,
        }
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        match self {
            Self::Sqlite(q) => q.reclaim_stale(claimed_before, limit).await,
            Self::Postgres(q) => q.reclaim_stale(claimed_before, limit).await,
        }
    }

    async fn get(&self, entry_id: &Uuid) -> Result<Option<ExecutionQueueEntry>, RepositoryError> {
        match self {
            Self::Sqlite(q) => q.get(entry_id).await,
            Self::Postgres(q) => q.get(entry_id).await,
        }
    }

    async fn list(
        &self,
        workspace_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<ExecutionQueueEntry>, RepositoryError> {
        match self {
            Self::Sqlite(q) => q.list(workspace_id, limit).await,
            Self::Postgres(q) => q.list(workspace_id, limit).await,
        }
    }
}
