//! SQLite metadata store: pool ownership, schema, transaction handout.

use crate::error::MetadataResult;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bitstreams (
    store_id INTEGER NOT NULL,
    internal_id TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    checksum_algorithm TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    registered_path TEXT,
    bytes_removed INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (store_id, internal_id)
);

CREATE INDEX IF NOT EXISTS idx_bitstreams_reclaimable
    ON bitstreams (deleted, bytes_removed, deleted_at);

CREATE INDEX IF NOT EXISTS idx_bitstreams_active_store
    ON bitstreams (store_id, deleted, internal_id);

CREATE UNIQUE INDEX IF NOT EXISTS idx_bitstreams_registered
    ON bitstreams (store_id, registered_path)
    WHERE registered_path IS NOT NULL;

CREATE TABLE IF NOT EXISTS job_leases (
    job_name TEXT PRIMARY KEY,
    ticket TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;

/// SQLite-backed metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and apply the
    /// schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures when request
            // transactions and background jobs overlap.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the schema. Idempotent.
    pub async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Begin a transaction owned by the caller. Row operations take the
    /// transaction's connection; the caller commits or rolls back.
    pub async fn begin(&self) -> MetadataResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Check out a plain connection for reads outside any transaction.
    pub async fn conn(&self) -> MetadataResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
