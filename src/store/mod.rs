//! Local persistence layer
//!
//! One SQLite file holds everything the client persists across sessions:
//!
//! - [`capability`] — the single directory-capability record (fixed key)
//! - [`history`] — delivery history for finished artifacts
//!
//! Versioning is deliberately blunt: a single store version identifier. If
//! the value on disk differs from [`STORE_VERSION`], the store is recreated
//! from scratch rather than migrated.

use sqlx::sqlite::SqlitePool;
use std::path::Path;

use crate::error::{Error, Result, StoreError};

mod capability;
mod history;

pub use capability::{DirectoryCapability, Permission};
pub use history::DeliveryRecord;

/// Current store schema version; bump to force recreation
pub const STORE_VERSION: i64 = 1;

/// Handle to the client's local SQLite store
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Open (or create) the store at the given path
    ///
    /// Creates parent directories as needed. If the on-disk version
    /// identifier does not match [`STORE_VERSION`], all tables are dropped
    /// and recreated.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Store(StoreError::OpenFailed(format!(
                    "failed to create store directory: {e}"
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Store(StoreError::OpenFailed(format!(
                    "failed to parse store path: {e}"
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Store(StoreError::OpenFailed(format!(
                "failed to connect to store: {e}"
            )))
        })?;

        let store = Self { pool };
        store.prepare_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store (tests and throwaway sessions)
    ///
    /// Pinned to a single connection: every pooled connection to an
    /// in-memory SQLite database would otherwise see its own empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                Error::Store(StoreError::OpenFailed(format!(
                    "failed to open in-memory store: {e}"
                )))
            })?;
        let store = Self { pool };
        store.prepare_schema().await?;
        Ok(store)
    }

    async fn prepare_schema(&self) -> Result<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::MigrationFailed(format!(
                    "failed to read store version: {e}"
                )))
            })?;

        if version != 0 && version != STORE_VERSION {
            tracing::warn!(
                on_disk = version,
                expected = STORE_VERSION,
                "Store version mismatch, recreating store"
            );
            self.drop_tables().await?;
        }

        self.create_tables().await?;

        sqlx::query(&format!("PRAGMA user_version = {STORE_VERSION}"))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::MigrationFailed(format!(
                    "failed to set store version: {e}"
                )))
            })?;

        Ok(())
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS capability_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::MigrationFailed(format!(
                "failed to create capability_store: {e}"
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delivery_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                artifact_id TEXT NOT NULL,
                title TEXT NOT NULL,
                filename TEXT NOT NULL,
                method TEXT NOT NULL,
                delivered_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::MigrationFailed(format!(
                "failed to create delivery_history: {e}"
            )))
        })?;

        Ok(())
    }

    async fn drop_tables(&self) -> Result<()> {
        for table in ["capability_store", "delivery_history"] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::MigrationFailed(format!(
                        "failed to drop {table}: {e}"
                    )))
                })?;
        }
        Ok(())
    }

    /// Close the store, flushing outstanding writes
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
