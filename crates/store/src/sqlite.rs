//! SQLite store.
//!
//! Uses a single SQLite database file with two tables:
//! - `contexts`  one row per packet; the packet itself is a JSON body,
//!   with `version` mirrored into a column for the optimistic check
//! - `context_versions`  append-only snapshots
//!
//! `update` is a single `UPDATE ... WHERE id = ? AND version = ?`, so a
//! concurrent writer that read an older version affects zero rows and gets
//! a version conflict instead of overwriting.

use async_trait::async_trait;
use contextrelay_core::context::{ContextPacket, VersionSnapshot};
use contextrelay_core::error::StoreError;
use contextrelay_core::store::{ContextStore, ContextSummary};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// A SQLite-backed context store.
pub struct SqliteStore {
    pool: SqlitePool,
    available: AtomicBool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite context store initialized at {}", path.display());
        Ok(store)
    }

    /// An ephemeral in-process database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite options: {e}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            available: AtomicBool::new(true),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contexts (
                id             TEXT PRIMARY KEY NOT NULL,
                session_id     TEXT,
                version        INTEGER NOT NULL,
                fragment_count INTEGER NOT NULL,
                body           TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("contexts table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS context_versions (
                snapshot_id    TEXT PRIMARY KEY NOT NULL,
                context_id     TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                label          TEXT,
                body           TEXT NOT NULL,
                created_at     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("context_versions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_versions_context ON context_versions(context_id, version_number)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("versions index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("sqlite store switched off".into()))
        }
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
        serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(row: &sqlx::sqlite::SqliteRow) -> Result<T, StoreError> {
        let body: String = row
            .try_get("body")
            .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
        serde_json::from_str(&body).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn stored_version(&self, id: &str) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query("SELECT version FROM contexts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        row.map(|r| {
            r.try_get::<i64, _>("version")
                .map(|v| v as u64)
                .map_err(|e| StoreError::QueryFailed(format!("version column: {e}")))
        })
        .transpose()
    }
}

#[async_trait]
impl ContextStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, id: &str) -> Result<Option<ContextPacket>, StoreError> {
        self.ensure_available()?;
        let row = sqlx::query("SELECT body FROM contexts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn put(&self, packet: &ContextPacket) -> Result<(), StoreError> {
        self.ensure_available()?;
        let body = Self::encode(packet)?;

        sqlx::query(
            r#"
            INSERT INTO contexts (id, session_id, version, fragment_count, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                version = excluded.version,
                fragment_count = excluded.fragment_count,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&packet.id)
        .bind(&packet.session_id)
        .bind(packet.version as i64)
        .bind(packet.fragments.len() as i64)
        .bind(&body)
        .bind(packet.created_at.to_rfc3339())
        .bind(packet.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to store context: {e}")))?;

        debug!(context_id = %packet.id, version = packet.version, "Stored context in SQLite");
        Ok(())
    }

    async fn update(
        &self,
        packet: &ContextPacket,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let body = Self::encode(packet)?;

        let result = sqlx::query(
            r#"
            UPDATE contexts
            SET session_id = ?, version = ?, fragment_count = ?, body = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&packet.session_id)
        .bind(packet.version as i64)
        .bind(packet.fragments.len() as i64)
        .bind(&body)
        .bind(packet.updated_at.to_rfc3339())
        .bind(&packet.id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to update context: {e}")))?;

        if result.rows_affected() == 1 {
            debug!(context_id = %packet.id, version = packet.version, "Updated context in SQLite");
            return Ok(());
        }

        match self.stored_version(&packet.id).await? {
            None => Err(StoreError::NotFound(packet.id.clone())),
            Some(actual) => Err(StoreError::VersionConflict {
                context_id: packet.id.clone(),
                expected: expected_version,
                actual,
            }),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        sqlx::query("DELETE FROM context_versions WHERE context_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let result = sqlx::query("DELETE FROM contexts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<ContextSummary>, StoreError> {
        self.ensure_available()?;
        let rows = sqlx::query("SELECT body FROM contexts ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| Self::decode::<ContextPacket>(row).map(|p| ContextSummary::from(&p)))
            .collect()
    }

    async fn store_version(&self, snapshot: &VersionSnapshot) -> Result<(), StoreError> {
        self.ensure_available()?;
        let body = Self::encode(snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO context_versions (snapshot_id, context_id, version_number, label, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.snapshot_id)
        .bind(&snapshot.context_id)
        .bind(snapshot.version_number as i64)
        .bind(&snapshot.label)
        .bind(&body)
        .bind(snapshot.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to store version: {e}")))?;

        Ok(())
    }

    async fn list_versions(&self, context_id: &str) -> Result<Vec<VersionSnapshot>, StoreError> {
        self.ensure_available()?;
        let rows = sqlx::query(
            "SELECT body FROM context_versions WHERE context_id = ? ORDER BY version_number ASC, created_at ASC",
        )
        .bind(context_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::decode).collect()
    }

    async fn get_version(&self, snapshot_id: &str) -> Result<Option<VersionSnapshot>, StoreError> {
        self.ensure_available()?;
        let row = sqlx::query("SELECT body FROM context_versions WHERE snapshot_id = ?")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM context_versions")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        sqlx::query("DELETE FROM contexts")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn set_available(&self, available: bool) -> bool {
        self.available.store(available, Ordering::SeqCst);
        true
    }
}
