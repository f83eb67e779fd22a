//! Per-IP validation cache.
//!
//! Each validated address gets a short-lived entry (`cache:<ip>`) holding its
//! last country and hook. Authentication failures are counted under a
//! separate key (`fail:<ip>`) with the store's atomic increment, so concurrent
//! failures from one address are not lost. Both expire after the configured
//! retention window.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CACHE_KEY_PREFIX, FAIL_KEY_PREFIX};
use crate::error_handling::StoreError;
use crate::pipeline::{Hook, ValidationRecord};
use crate::storage::{get_json, set_json, Store};

/// Last validation of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Country code of the last validation
    pub country_code: String,
    /// Hook of the last validation
    pub hook: Hook,
    /// Authentication failures within the retention window
    pub fail: u32,
    /// When the address was last validated
    pub last_seen: DateTime<Utc>,
}

fn cache_key(ip: IpAddr) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, ip)
}

fn fail_key(ip: IpAddr) -> String {
    format!("{}{}", FAIL_KEY_PREFIX, ip)
}

/// The validation cache and failure counter.
#[derive(Clone)]
pub struct ValidationCache {
    store: Arc<dyn Store>,
}

impl ValidationCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The entry for `ip`, with its current failure count.
    pub async fn get(&self, ip: IpAddr) -> Result<Option<CacheEntry>, StoreError> {
        let entry: Option<CacheEntry> = get_json(self.store.as_ref(), &cache_key(ip)).await?;
        match entry {
            Some(mut entry) => {
                entry.fail = self.failure_count(ip).await?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Overwrites the entry for the record's address.
    pub async fn update(
        &self,
        record: &ValidationRecord,
        hook: Hook,
        ttl: Duration,
    ) -> Result<CacheEntry, StoreError> {
        let entry = CacheEntry {
            country_code: record.country_code.clone(),
            hook,
            fail: self.failure_count(record.ip).await?,
            last_seen: Utc::now(),
        };
        set_json(self.store.as_ref(), &cache_key(record.ip), &entry, Some(ttl)).await?;
        Ok(entry)
    }

    /// Authentication failures counted for `ip` within the retention window.
    pub async fn failure_count(&self, ip: IpAddr) -> Result<u32, StoreError> {
        let Some(raw) = self.store.get(&fail_key(ip)).await? else {
            return Ok(0);
        };
        raw.trim()
            .parse::<u32>()
            .map_err(|_| StoreError::NotACounter(fail_key(ip)))
    }

    /// Counts one authentication failure for `ip` and returns the new count.
    ///
    /// The counter's retention window restarts with every failure.
    pub async fn record_failure(&self, ip: IpAddr, ttl: Duration) -> Result<u32, StoreError> {
        let count = self.store.increment(&fail_key(ip), Some(ttl)).await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Whether `ip` has reached `threshold` failures.
    pub async fn is_throttled(&self, ip: IpAddr, threshold: u32) -> Result<bool, StoreError> {
        Ok(self.failure_count(ip).await? >= threshold)
    }

    /// Removes the entry and failure counter of one address.
    pub async fn remove(&self, ip: IpAddr) -> Result<(), StoreError> {
        self.store.delete(&cache_key(ip)).await?;
        self.store.delete(&fail_key(ip)).await
    }

    /// Removes every entry and failure counter, returning how many keys went.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        let entries = self.store.delete_prefix(CACHE_KEY_PREFIX).await?;
        let counters = self.store.delete_prefix(FAIL_KEY_PREFIX).await?;
        Ok(entries + counters)
    }
}
