//! Infrastructure layer for Flowgate.
//!
//! Implements the repository and collaborator traits defined in
//! `flowgate-core`: SQLite storage for definitions, executions, audit records
//! and the local queue; a PostgreSQL queue for multi-host dispatch; the
//! `flowgate.toml` loader; and an in-memory entity store with its schema
//! registry.

pub mod config;
pub mod entity;
pub mod postgres;
pub mod queue;
pub mod sqlite;

use flowgate_types::error::RepositoryError;

/// Unique-key violations become `Conflict`; everything else is a query error.
pub(crate) fn map_sqlx(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        _ => RepositoryError::Query(e.to_string()),
    }
}
