//! Validation log.
//!
//! Operator-facing record of validations, filtered by the recording policy
//! and bounded per hook. Distinct from diagnostic logging.

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::config::RecordingPolicy;
use crate::error_handling::StoreError;
use crate::pipeline::{Hook, ValidationResult};
use crate::storage::{LogEntry, Store};

/// Whether `entry` is recorded under `policy`.
///
/// Authentication failures follow the failure policies; everything else is
/// filtered on blocked/passed and on the principal.
pub fn should_record(policy: RecordingPolicy, entry: &LogEntry) -> bool {
    match entry.record.result() {
        Some(ValidationResult::Failed) => policy.records_failures(),
        result => policy.should_record(
            result != Some(ValidationResult::Passed),
            entry.record.authenticated,
        ),
    }
}

/// Writes and reads the validation log.
#[derive(Clone)]
pub struct LogRecorder {
    store: Arc<dyn Store>,
}

impl LogRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Records `entry` if `policy` allows it, returning whether it did.
    ///
    /// With `backup_dir`, the entry is also appended to `<hook>.jsonl` there.
    pub async fn record(
        &self,
        entry: &LogEntry,
        policy: RecordingPolicy,
        max_logs: usize,
        backup_dir: Option<&Path>,
    ) -> Result<bool, StoreError> {
        if !should_record(policy, entry) {
            return Ok(false);
        }

        self.store.append_log(entry, max_logs).await?;
        if let Some(dir) = backup_dir {
            append_backup(dir, entry).await?;
        }
        Ok(true)
    }

    /// Most recent entries first.
    pub async fn recent(&self, hook: Option<Hook>, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        self.store.recent_logs(hook, limit).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear_logs().await
    }
}

async fn append_backup(dir: &Path, entry: &LogEntry) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    let path = dir.join(format!("{}.jsonl", entry.hook));
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
