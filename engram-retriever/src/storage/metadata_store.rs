//! SQLite metadata store for the vector index.
//!
//! Two tables per branch database:
//!
//! ```sql
//! -- slot-to-commit mapping, one row per inserted vector
//! CREATE TABLE vector_map (
//!     slot_id INTEGER PRIMARY KEY,     -- physical position in the index
//!     commit_id TEXT NOT NULL
//! );
//!
//! -- singleton synchronization state
//! CREATE TABLE sync_state (
//!     id INTEGER PRIMARY KEY CHECK (id = 1),
//!     last_synced_commit_id TEXT,
//!     embedding_signature TEXT,
//!     last_sync_time INTEGER
//! );
//! ```
//!
//! The rows for one commit are inserted inside a single transaction, so a
//! reader never observes one of a commit's two expected rows as final state.
//! If the `vector_map` table exists with an unexpected shape at startup,
//! both tables are dropped and recreated; losing the sync state forces a
//! full rebuild on the next engine construction.

use crate::error::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Singleton synchronization state record.
///
/// Updated only after a full batch (rebuild or incremental) completes; all
/// fields are null on a fresh or reset store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub last_synced_commit_id: Option<String>,
    pub embedding_signature: Option<String>,
    pub last_sync_time: Option<i64>,
}

/// SQLite-backed store mapping index slots to commit ids.
#[derive(Clone, Debug)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open the store with persistent SQLite storage.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Open the store with in-memory SQLite storage for testing.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::check_schema(&pool).await?;
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    /// Drop the tables when an older incompatible schema is found. Runs once
    /// at open; the lost sync state forces a rebuild upstream.
    async fn check_schema(pool: &SqlitePool) -> Result<()> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'vector_map'",
        )
        .fetch_optional(pool)
        .await?;

        if let Some(schema_sql) = existing {
            if !schema_sql.contains("slot_id") {
                warn!("old metadata schema detected, dropping tables to rebuild");
                sqlx::query("DROP TABLE IF EXISTS vector_map")
                    .execute(pool)
                    .await?;
                sqlx::query("DROP TABLE IF EXISTS sync_state")
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_map (
                slot_id INTEGER PRIMARY KEY,
                commit_id TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_map_commit ON vector_map(commit_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_synced_commit_id TEXT,
                embedding_signature TEXT,
                last_sync_time INTEGER
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO sync_state (id) VALUES (1)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Begin a transaction covering one commit's metadata rows.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Record one slot-to-commit mapping inside the given transaction.
    pub async fn record_vector(
        conn: &mut SqliteConnection,
        slot_id: u64,
        commit_id: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO vector_map (slot_id, commit_id) VALUES (?1, ?2)")
            .bind(slot_id as i64)
            .bind(commit_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Delete every row for a commit inside the given transaction. Used to
    /// repair a partially indexed commit before re-indexing it.
    pub async fn delete_vectors_for(conn: &mut SqliteConnection, commit_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vector_map WHERE commit_id = ?1")
            .bind(commit_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of vectors recorded for a commit.
    pub async fn count_vectors_for(&self, commit_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_map WHERE commit_id = ?1")
            .bind(commit_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Total number of recorded vectors across all commits.
    pub async fn total_vectors(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_map")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Resolve slot ids back to commit ids. Slots with no row are absent
    /// from the returned map.
    pub async fn resolve_slots(&self, slot_ids: &[u64]) -> Result<HashMap<u64, String>> {
        if slot_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = slot_ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT slot_id, commit_id FROM vector_map WHERE slot_id IN ({placeholders})"
        );

        let mut query_builder = sqlx::query(&query);
        for slot in slot_ids {
            query_builder = query_builder.bind(*slot as i64);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;
        let mut resolved = HashMap::with_capacity(rows.len());
        for row in rows {
            let slot: i64 = row.get("slot_id");
            let commit_id: String = row.get("commit_id");
            resolved.insert(slot as u64, commit_id);
        }
        Ok(resolved)
    }

    /// Delete every row at or beyond `slot_id`. Reconciles rows committed by
    /// a pass that crashed before the index file was persisted.
    pub async fn delete_slots_from(&self, slot_id: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vector_map WHERE slot_id >= ?1")
            .bind(slot_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Load the singleton sync state.
    pub async fn load_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            "SELECT last_synced_commit_id, embedding_signature, last_sync_time
             FROM sync_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => SyncState {
                last_synced_commit_id: row.get("last_synced_commit_id"),
                embedding_signature: row.get("embedding_signature"),
                last_sync_time: row.get("last_sync_time"),
            },
            None => SyncState::default(),
        })
    }

    /// Persist the singleton sync state.
    pub async fn save_state(&self, state: &SyncState) -> Result<()> {
        sqlx::query(
            "UPDATE sync_state
             SET last_synced_commit_id = ?1, embedding_signature = ?2, last_sync_time = ?3
             WHERE id = 1",
        )
        .bind(state.last_synced_commit_id.as_deref())
        .bind(state.embedding_signature.as_deref())
        .bind(state.last_sync_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop all vector rows and reset the sync state. First step of a full
    /// rebuild; a crash mid-rebuild then re-triggers the rebuild at startup
    /// instead of resuming against truncated metadata.
    pub async fn truncate_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vector_map")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE sync_state
             SET last_synced_commit_id = NULL, embedding_signature = NULL, last_sync_time = NULL
             WHERE id = 1",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
