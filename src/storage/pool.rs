//! Database connection pool management.
//!
//! This module initializes and configures the SQLite connection pool with:
//! - WAL mode enabled for concurrent access
//! - Automatic database file creation

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;

use log::{error, info};
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::error_handling::StoreError;

/// Initializes and returns a database connection pool for `db_path`.
///
/// Creates the database file if it doesn't exist and enables WAL mode
/// so several request-handling processes can share the store.
pub async fn init_db_pool_with_path(db_path: &Path) -> Result<Pool<Sqlite>, StoreError> {
    let db_path_str = db_path.to_string_lossy().to_string();
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&db_path_str)
    {
        Ok(_) => info!("Store database created at {}", db_path_str),
        Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
            info!("Using existing store database {}", db_path_str)
        }
        Err(e) => {
            error!("Failed to create store database: {e}");
            return Err(StoreError::FileCreation(e.to_string()));
        }
    }

    let pool = SqlitePool::connect(&format!("sqlite:{}", db_path_str))
        .await
        .map_err(|e| {
            error!("Failed to connect to store database: {e}");
            StoreError::Sql(e)
        })?;

    // Enable WAL mode
    sqlx::query("PRAGMA journal_mode=WAL")
        .execute(&pool)
        .await
        .map_err(|e| {
            error!("Failed to set WAL mode: {e}");
            StoreError::Sql(e)
        })?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pool_creates_missing_file() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("store.db");
        assert!(!path.exists());
        let pool = init_db_pool_with_path(&path).await.expect("pool");
        assert!(path.exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_pool_reuses_existing_file() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("store.db");
        init_db_pool_with_path(&path).await.expect("first").close().await;
        let pool = init_db_pool_with_path(&path).await.expect("second");
        pool.close().await;
    }

    #[tokio::test]
    async fn test_pool_reports_unwritable_location() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("missing").join("store.db");
        let result = init_db_pool_with_path(&path).await;
        assert!(matches!(result, Err(StoreError::FileCreation(_))));
    }
}
