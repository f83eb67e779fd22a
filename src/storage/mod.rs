//! Host key/value store.
//!
//! The validation pipeline shares three pieces of mutable state across
//! requests: the per-IP validation cache, the statistics record and the
//! database descriptors inside the settings record. All of it lives behind the
//! [`Store`] trait, which offers no transactional isolation beyond a single
//! atomic [`Store::increment`].
//!
//! Two backends are provided:
//! - [`MemoryStore`]: process-local maps with lazy expiry
//! - [`SqliteStore`]: SQLite via `sqlx`, for state shared between processes

mod memory;
mod migrations;
mod pool;
mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error_handling::StoreError;
use crate::pipeline::{Hook, ValidationRecord};

pub use memory::MemoryStore;
pub use migrations::run_migrations;
pub use pool::init_db_pool_with_path;
pub use sqlite::SqliteStore;

/// One line of the validation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the validation happened
    pub time: DateTime<Utc>,
    /// Hook that ran the validation
    pub hook: Hook,
    /// Request method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// The validation outcome
    pub record: ValidationRecord,
}

/// A host-provided key/value store with expiry.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads a value; expired values read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a value, replacing any previous one. `ttl = None` never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Removes a value.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every value whose key starts with `prefix`, returning how many.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Atomically increments the counter under `key` and returns the new value.
    ///
    /// A missing or expired counter starts at 1. The expiry is renewed to `ttl`.
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError>;

    /// Appends a log entry, keeping at most `max_per_hook` entries for its hook.
    async fn append_log(&self, entry: &LogEntry, max_per_hook: usize) -> Result<(), StoreError>;

    /// Most recent log entries first, optionally restricted to one hook.
    async fn recent_logs(
        &self,
        hook: Option<Hook>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError>;

    /// Removes all log entries.
    async fn clear_logs(&self) -> Result<(), StoreError>;
}

/// Reads and deserializes a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn Store,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serializes and writes a JSON value.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn Store,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}
