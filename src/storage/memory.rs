//! Process-local store backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{LogEntry, Store};
use crate::error_handling::StoreError;
use crate::pipeline::Hook;

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory [`Store`] with lazy expiry.
///
/// Suitable for a single long-lived server process and for tests. Expired
/// values are dropped when they are next touched.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, StoredValue>>,
    logs: Mutex<HashMap<Hook, VecDeque<LogEntry>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, StoredValue>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<Hook, VecDeque<LogEntry>>> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut values = self.values();
        match values.get(key) {
            Some(stored) if stored.is_live(now) => Ok(Some(stored.value.clone())),
            Some(_) => {
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.values().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut values = self.values();
        let before = values.len();
        values.retain(|key, _| !key.starts_with(prefix));
        Ok((before - values.len()) as u64)
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut values = self.values();
        let current = match values.get(key) {
            Some(stored) if stored.is_live(now) => stored
                .value
                .parse::<i64>()
                .map_err(|_| StoreError::NotACounter(key.to_string()))?,
            _ => 0,
        };
        let next = current + 1;
        values.insert(
            key.to_string(),
            StoredValue {
                value: next.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(next)
    }

    async fn append_log(&self, entry: &LogEntry, max_per_hook: usize) -> Result<(), StoreError> {
        let mut logs = self.logs();
        let queue = logs.entry(entry.hook).or_default();
        queue.push_back(entry.clone());
        while queue.len() > max_per_hook {
            queue.pop_front();
        }
        Ok(())
    }

    async fn recent_logs(
        &self,
        hook: Option<Hook>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let logs = self.logs();
        let mut entries: Vec<LogEntry> = logs
            .iter()
            .filter(|(h, _)| hook.is_none_or(|wanted| wanted == **h))
            .flat_map(|(_, queue)| queue.iter().cloned())
            .collect();
        entries.sort_by(|a, b| b.time.cmp(&a.time));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn clear_logs(&self) -> Result<(), StoreError> {
        self.logs().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ValidationRecord, ValidationResult};
    use chrono::Utc;

    fn entry(hook: Hook, seconds_ago: i64) -> LogEntry {
        LogEntry {
            time: Utc::now() - chrono::Duration::seconds(seconds_ago),
            hook,
            method: "POST".to_string(),
            path: "/wp-login.php".to_string(),
            record: ValidationRecord::unresolved("198.51.100.4".parse().unwrap())
                .with_result(ValidationResult::Unknown),
        }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_expire() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_starts_at_one_and_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("fail:1.2.3.4", None).await.unwrap(), 1);
        assert_eq!(store.increment("fail:1.2.3.4", None).await.unwrap(), 2);
        assert_eq!(store.increment("fail:1.2.3.4", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_increment_restarts_after_expiry() {
        let store = MemoryStore::new();
        let ttl = Some(Duration::from_millis(20));
        store.increment("c", ttl).await.unwrap();
        store.increment("c", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let store = MemoryStore::new();
        store.set("c", "abc", None).await.unwrap();
        assert!(matches!(
            store.increment("c", None).await,
            Err(StoreError::NotACounter(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_prefix() {
        let store = MemoryStore::new();
        store.set("cache:1.1.1.1", "a", None).await.unwrap();
        store.set("cache:2.2.2.2", "b", None).await.unwrap();
        store.set("settings", "c", None).await.unwrap();
        assert_eq!(store.delete_prefix("cache:").await.unwrap(), 2);
        assert!(store.get("settings").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_logs_are_bounded_per_hook_and_newest_first() {
        let store = MemoryStore::new();
        for age in [30, 20, 10] {
            store.append_log(&entry(Hook::Login, age), 2).await.unwrap();
        }
        store.append_log(&entry(Hook::Comment, 5), 2).await.unwrap();

        let login = store.recent_logs(Some(Hook::Login), 10).await.unwrap();
        assert_eq!(login.len(), 2);
        assert!(login[0].time > login[1].time);

        let all = store.recent_logs(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].hook, Hook::Comment);

        store.clear_logs().await.unwrap();
        assert!(store.recent_logs(None, 10).await.unwrap().is_empty());
    }
}
