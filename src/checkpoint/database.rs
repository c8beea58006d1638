//! SQLite-backed checkpoint store.
//!
//! Checkpoints are rows in a single `checkpoints` table keyed by
//! `(run_id, version)`; the full checkpoint is stored as a JSON payload.
//! Inserts run in a transaction, so a reader sees either the previous
//! latest version or the new one, never a partial write.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::CheckpointError;

use super::{Checkpoint, CheckpointStore};

/// Checkpoint store backed by a SQLite database.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Connects to a SQLite database and bootstraps the schema.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection string (e.g. "sqlite://checkpoints.db"
    ///   or "sqlite::memory:"). File databases are created if missing.
    pub async fn connect(url: &str) -> Result<Self, CheckpointError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Creates a store from an existing pool, bootstrapping the schema.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, CheckpointError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id     TEXT    NOT NULL,
                version    INTEGER NOT NULL,
                phase      TEXT    NOT NULL,
                payload    TEXT    NOT NULL,
                created_at TEXT    NOT NULL,
                PRIMARY KEY (run_id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let payload = serde_json::to_string(checkpoint)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (run_id, version, phase, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&checkpoint.run_id)
        .bind(checkpoint.version as i64)
        .bind(&checkpoint.phase)
        .bind(&payload)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(
            run_id = %checkpoint.run_id,
            version = checkpoint.version,
            "Checkpoint row inserted"
        );
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query(
            r#"
            SELECT payload FROM checkpoints
            WHERE run_id = ?1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                let checkpoint: Checkpoint = serde_json::from_str(&payload)?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM checkpoints WHERE run_id = ?1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
