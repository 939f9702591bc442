//! SQLite storage handle.
//!
//! One type owns both concerns of bringing the store up: opening the pool
//! (WAL mode, bounded connections) and walking the embedded schema history
//! forward. Repositories borrow the pool from here.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while opening or migrating the store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot create parent directory for {path}: {source}")]
    ParentDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("schema revision {version} ({name}) failed: {source}")]
    Revision {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("schema history bookkeeping failed: {0}")]
    History(#[source] sqlx::Error),

    #[error("database did not answer ping: {0}")]
    Unreachable(#[source] sqlx::Error),
}

/// One embedded schema revision. Revisions are append-only and applied in
/// version order; each runs inside its own transaction together with its
/// history row, so a crash mid-migration leaves no half-applied revision.
struct SchemaRevision {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_HISTORY: &[SchemaRevision] = &[SchemaRevision {
    version: 1,
    name: "initial",
    sql: include_str!("../../../migrations/001_initial_schema.sql"),
}];

/// Handle over the SQLite store.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a file-backed store (creating file and parent directories if
    /// missing), switch it to WAL, and bring the schema up to date.
    pub async fn open(path: &str, max_connections: u32) -> Result<Self, StorageError> {
        ensure_parent_dir(path)?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|source| StorageError::Open { path: path.to_string(), source })?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory store for tests. A single connection keeps the
    /// database alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .shared_cache(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| StorageError::Open { path: ":memory:".to_string(), source })?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply every schema revision newer than what the store has seen.
    /// Idempotent; returns the number of revisions applied.
    pub async fn migrate(&self) -> Result<usize, StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_history (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::History)?;

        let applied_through: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_history ORDER BY version DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::History)?;
        let applied_through = applied_through.map_or(0, |(v,)| v);

        let mut applied = 0;
        for revision in SCHEMA_HISTORY {
            if revision.version <= applied_through {
                continue;
            }
            self.apply(revision).await?;
            applied += 1;
            tracing::debug!(
                version = revision.version,
                name = revision.name,
                "schema revision applied"
            );
        }
        Ok(applied)
    }

    async fn apply(&self, revision: &SchemaRevision) -> Result<(), StorageError> {
        let failed = |source| StorageError::Revision {
            version: revision.version,
            name: revision.name,
            source,
        };

        let mut tx = self.pool.begin().await.map_err(failed)?;
        sqlx::raw_sql(revision.sql)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;
        sqlx::query("INSERT INTO schema_history (version, name) VALUES (?, ?)")
            .bind(revision.version)
            .bind(revision.name)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;
        tx.commit().await.map_err(failed)
    }

    /// Cheap liveness probe for startup checks.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Unreachable)?;
        Ok(())
    }
}

fn ensure_parent_dir(path: &str) -> Result<(), StorageError> {
    let Some(parent) = Path::new(path).parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|source| StorageError::ParentDir {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_migrates_and_answers() {
        let db = Database::open_in_memory().await.unwrap();
        db.ping().await.unwrap();

        // Core tables exist after migration.
        for table in ["experiments", "serve_events", "policy_arm_state", "reward_updates"] {
            let row: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();
            assert_eq!(row.0, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        // open_in_memory already migrated; a second walk applies nothing.
        assert_eq!(db.migrate().await.unwrap(), 0);

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_history")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, SCHEMA_HISTORY.len() as i64);
    }
}
