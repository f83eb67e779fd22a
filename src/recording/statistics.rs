//! Validation statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::STATISTICS_KEY;
use crate::error_handling::StoreError;
use crate::pipeline::{ValidationRecord, ValidationResult};
use crate::storage::{get_json, set_json, Store};

/// Calls and cumulative latency of one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub count: u64,
    /// Cumulative resolution time in seconds
    pub time: f64,
}

/// The persisted `statistics` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    pub passed: u64,
    pub blocked: u64,
    pub unknown: u64,
    pub failed: u64,
    pub ipv4: u64,
    pub ipv6: u64,
    pub countries: BTreeMap<String, u64>,
    pub providers: BTreeMap<String, ProviderStats>,
    /// When counting started (creation or last clear)
    pub since: DateTime<Utc>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            passed: 0,
            blocked: 0,
            unknown: 0,
            failed: 0,
            ipv4: 0,
            ipv6: 0,
            countries: BTreeMap::new(),
            providers: BTreeMap::new(),
            since: Utc::now(),
        }
    }
}

impl Statistics {
    /// Total number of counted validations.
    pub fn total(&self) -> u64 {
        self.passed + self.blocked + self.unknown + self.failed
    }

    /// Adds one outcome.
    pub fn count(&mut self, record: &ValidationRecord) {
        match record.result() {
            Some(ValidationResult::Passed) => self.passed += 1,
            Some(ValidationResult::Blocked) => self.blocked += 1,
            Some(ValidationResult::Failed) => self.failed += 1,
            Some(ValidationResult::Unknown) | None => self.unknown += 1,
        }

        if record.ip.is_ipv4() {
            self.ipv4 += 1;
        } else {
            self.ipv6 += 1;
        }

        *self
            .countries
            .entry(record.country_code.clone())
            .or_default() += 1;

        let provider = self.providers.entry(record.provider.clone()).or_default();
        provider.count += 1;
        provider.time += record.elapsed.as_secs_f64();
    }
}

/// Counts outcomes into the `statistics` record.
///
/// Increments are read-modify-write without isolation; concurrent requests
/// may lose a count.
#[derive(Clone)]
pub struct StatisticsAggregator {
    store: Arc<dyn Store>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The current record (a fresh one when none is stored).
    pub async fn get(&self) -> Result<Statistics, StoreError> {
        Ok(get_json(self.store.as_ref(), STATISTICS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn record(&self, record: &ValidationRecord) -> Result<(), StoreError> {
        let mut statistics = self.get().await?;
        statistics.count(record);
        set_json(self.store.as_ref(), STATISTICS_KEY, &statistics, None).await
    }

    /// Resets every counter.
    pub async fn clear(&self) -> Result<(), StoreError> {
        set_json(
            self.store.as_ref(),
            STATISTICS_KEY,
            &Statistics::default(),
            None,
        )
        .await
    }
}
