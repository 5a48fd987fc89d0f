use std::{fs, path::PathBuf};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

/// Durable local-path → remote-folder-id map. Keys are normalized before
/// they reach this store, so one workspace owns one flat namespace that
/// survives restarts.
#[derive(Clone)]
pub struct MappingStore {
    pool: SqlitePool,
}

impl MappingStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, MappingError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, MappingError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), MappingError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Result<Option<String>, MappingError> {
        let row = sqlx::query("SELECT folder_id FROM folder_mappings WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row.try_get("folder_id")?))
    }

    pub async fn set(&self, path: &str, folder_id: &str) -> Result<(), MappingError> {
        sqlx::query(
            "INSERT INTO folder_mappings (path, folder_id) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET folder_id = excluded.folder_id",
        )
        .bind(path)
        .bind(folder_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<(), MappingError> {
        sqlx::query("DELETE FROM folder_mappings WHERE path = ?1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes the entry for `prefix` and every entry below it. Siblings
    /// that merely share leading characters are untouched.
    pub async fn delete_by_prefix(&self, prefix: &str) -> Result<(), MappingError> {
        let pattern = format!("{}/%", prefix.trim_end_matches('/'));
        sqlx::query("DELETE FROM folder_mappings WHERE path = ?1 OR path LIKE ?2")
            .bind(prefix)
            .bind(pattern)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn default_db_path() -> Result<PathBuf, MappingError> {
    let base = dirs::data_dir().ok_or(MappingError::MissingDataDir)?;
    Ok(base.join("docshelfd").join("mappings.db"))
}
