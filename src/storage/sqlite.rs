//! SQLite store backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use super::{init_db_pool_with_path, run_migrations, LogEntry, Store};
use crate::error_handling::StoreError;
use crate::pipeline::Hook;

/// [`Store`] backed by a SQLite database.
///
/// Several processes may open the same file; the failure counter stays exact
/// because [`Store::increment`] is a single upsert statement.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_millis() + ttl.as_millis() as i64)
}

impl SqliteStore {
    /// Opens (creating if needed) the store database at `path` and applies migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = init_db_pool_with_path(path).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database, mainly for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every connection to `sqlite::memory:` is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool whose schema is already migrated.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Deletes expired key/value rows, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM kv_store WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_millis())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv_store WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expiry_millis(ttl))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE substr(key, 1, ?) = ?")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError> {
        let now = now_millis();
        let row = sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?1, '1', ?2)
             ON CONFLICT(key) DO UPDATE SET
                 value = CASE
                     WHEN kv_store.expires_at IS NOT NULL AND kv_store.expires_at <= ?3 THEN '1'
                     ELSE CAST(CAST(kv_store.value AS INTEGER) + 1 AS TEXT)
                 END,
                 expires_at = excluded.expires_at
             RETURNING value",
        )
        .bind(key)
        .bind(expiry_millis(ttl))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let value: String = row.try_get("value")?;
        value
            .parse::<i64>()
            .map_err(|_| StoreError::NotACounter(key.to_string()))
    }

    async fn append_log(&self, entry: &LogEntry, max_per_hook: usize) -> Result<(), StoreError> {
        let payload = serde_json::to_string(entry)?;
        let result = entry
            .record
            .result()
            .map(|r| r.to_string())
            .unwrap_or_default();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO validation_logs (hook, logged_at, ip, country_code, result, entry)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.hook.as_ref())
        .bind(entry.time.timestamp_millis())
        .bind(entry.record.ip.to_string())
        .bind(&entry.record.country_code)
        .bind(result)
        .bind(payload)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM validation_logs WHERE hook = ?1 AND id NOT IN (
                 SELECT id FROM validation_logs WHERE hook = ?1 ORDER BY id DESC LIMIT ?2
             )",
        )
        .bind(entry.hook.as_ref())
        .bind(max_per_hook as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recent_logs(
        &self,
        hook: Option<Hook>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let rows = match hook {
            Some(hook) => {
                sqlx::query(
                    "SELECT entry FROM validation_logs WHERE hook = ?
                     ORDER BY logged_at DESC, id DESC LIMIT ?",
                )
                .bind(hook.as_ref())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT entry FROM validation_logs ORDER BY logged_at DESC, id DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("entry")?;
            entries.push(serde_json::from_str(&raw)?);
        }
        Ok(entries)
    }

    async fn clear_logs(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM validation_logs")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ValidationRecord, ValidationResult};
    use tempfile::TempDir;

    fn entry(hook: Hook, seconds_ago: i64) -> LogEntry {
        LogEntry {
            time: Utc::now() - chrono::Duration::seconds(seconds_ago),
            hook,
            method: "GET".to_string(),
            path: "/wp-admin/admin.php".to_string(),
            record: ValidationRecord::resolved(
                "192.0.2.10".parse().unwrap(),
                "US",
                "ipinfo.io",
                Duration::from_millis(12),
            )
            .with_result(ValidationResult::Blocked),
        }
    }

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let store = SqliteStore::in_memory().await.expect("store");
        store.set("k", "one", None).await.unwrap();
        store.set("k", "two", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_expired_values_are_invisible_and_purged() {
        let store = SqliteStore::in_memory().await.expect("store");
        store
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_is_sequential() {
        let store = SqliteStore::in_memory().await.expect("store");
        for expected in 1..=4 {
            let value = store
                .increment("fail:192.0.2.10", Some(Duration::from_secs(60)))
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn test_increment_restarts_after_expiry() {
        let store = SqliteStore::in_memory().await.expect("store");
        let ttl = Some(Duration::from_millis(10));
        store.increment("c", ttl).await.unwrap();
        store.increment("c", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = SqliteStore::in_memory().await.expect("store");
        store.set("cache:a", "1", None).await.unwrap();
        store.set("cache:b", "2", None).await.unwrap();
        store.set("statistics", "{}", None).await.unwrap();
        assert_eq!(store.delete_prefix("cache:").await.unwrap(), 2);
        assert!(store.get("statistics").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_log_retention_per_hook() {
        let store = SqliteStore::in_memory().await.expect("store");
        for age in [40, 30, 20, 10] {
            store.append_log(&entry(Hook::Admin, age), 3).await.unwrap();
        }
        store.append_log(&entry(Hook::Login, 5), 3).await.unwrap();

        let admin = store.recent_logs(Some(Hook::Admin), 10).await.unwrap();
        assert_eq!(admin.len(), 3);
        assert!(admin[0].time >= admin[1].time);
        assert_eq!(admin[0].record.result(), Some(ValidationResult::Blocked));

        let all = store.recent_logs(None, 2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].hook, Hook::Login);
    }

    #[tokio::test]
    async fn test_open_file_backed_store_persists() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("store.db");
        {
            let store = SqliteStore::open(&path).await.expect("open");
            store.set("settings", "{\"version\":\"0.0.1\"}", None).await.unwrap();
        }
        let store = SqliteStore::open(&path).await.expect("reopen");
        assert!(store.get("settings").await.unwrap().is_some());
    }
}
