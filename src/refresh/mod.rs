//! Scheduled refresh of the local geolocation databases.
//!
//! One cycle walks both address families. A family that is due gets a
//! conditional fetch keyed on the last known Last-Modified time and ends in
//! one of these outcomes:
//!
//! | outcome        | next refresh               | retry counter |
//! |----------------|----------------------------|---------------|
//! | not modified   | now + cadence + 1..=6 days | unchanged     |
//! | fetched        | now + cadence              | reset to 0    |
//! | error          | now + 1 day                | incremented   |
//! | config error   | now + cadence              | unchanged     |
//!
//! Only one cycle runs at a time per scheduler. A trigger that fires while a
//! cycle is in progress returns immediately.

mod download;
mod extract;
mod schedule;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display};
use url::Url;

use crate::config::{DatabaseDescriptor, Settings, UpdateSettings, MAX_DATABASE_DOWNLOAD_SIZE};
use crate::error_handling::ConfigError;
use crate::security::validate_download_url;
use crate::storage::Store;

use download::{download_database, Download};
use extract::local_file_name;

pub use schedule::is_due;

/// Address family of a local database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum AddressFamily {
    /// IPv4 database
    #[strum(serialize = "IPv4")]
    V4,
    /// IPv6 database
    #[strum(serialize = "IPv6")]
    V6,
}

/// How a family's refresh attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RefreshOutcome {
    /// Not due yet; nothing was requested.
    NotDue,
    /// The source reported no change.
    NotModified,
    /// A new database replaced the local file.
    Fetched,
    /// Network failure or unexpected status; retried after the retry delay.
    Error,
    /// The source URL or destination path is unusable; not retried early.
    ConfigError,
}

/// Status/message pair reported for one family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStatus {
    /// Address family
    pub family: AddressFamily,
    /// Outcome
    pub outcome: RefreshOutcome,
    /// Human-readable detail
    pub message: String,
}

impl RefreshStatus {
    fn new(family: AddressFamily, outcome: RefreshOutcome, message: impl Into<String>) -> Self {
        Self {
            family,
            outcome,
            message: message.into(),
        }
    }
}

/// Clears the running flag when a cycle ends, even on error.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Refreshes the databases described in the persisted settings.
pub struct DatabaseRefreshScheduler {
    store: Arc<dyn Store>,
    client: reqwest::Client,
    max_size: usize,
    running: AtomicBool,
}

impl DatabaseRefreshScheduler {
    /// Creates a scheduler over the settings held in `store`.
    pub fn new(store: Arc<dyn Store>, client: reqwest::Client) -> Self {
        Self {
            store,
            client,
            max_size: MAX_DATABASE_DOWNLOAD_SIZE,
            running: AtomicBool::new(false),
        }
    }

    /// Overrides the download size cap.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Whether a cycle is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one refresh cycle.
    ///
    /// Returns `Ok(None)` when another cycle already holds the trigger.
    /// `force` ignores the schedule but still sends the conditional header.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> anyhow::Result<Option<Vec<RefreshStatus>>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Database refresh already running, trigger ignored");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        let mut settings = Settings::load(self.store.as_ref())
            .await
            .context("Failed to load settings for database refresh")?;

        let due: Vec<AddressFamily> = [AddressFamily::V4, AddressFamily::V6]
            .into_iter()
            .filter(|family| force || is_due(descriptor(&settings.update, *family), now))
            .collect();
        if due.is_empty() {
            return Ok(Some(
                [AddressFamily::V4, AddressFamily::V6]
                    .into_iter()
                    .map(|family| RefreshStatus::new(family, RefreshOutcome::NotDue, "not due"))
                    .collect(),
            ));
        }

        // Re-arm before any network work so a crashed cycle is not re-run at once.
        for family in &due {
            descriptor_mut(&mut settings.update, *family).next_refresh =
                Some(schedule::after_error(now));
        }
        settings
            .save(self.store.as_ref())
            .await
            .context("Failed to re-arm database refresh")?;

        let mut statuses = Vec::with_capacity(2);
        for family in [AddressFamily::V4, AddressFamily::V6] {
            if !due.contains(&family) {
                statuses.push(RefreshStatus::new(family, RefreshOutcome::NotDue, "not due"));
                continue;
            }
            let status = self.refresh_family(&mut settings.update, family, now).await;
            log::info!(
                "{} database refresh: {} ({})",
                family,
                status.outcome,
                status.message
            );
            statuses.push(status);
        }

        settings
            .save(self.store.as_ref())
            .await
            .context("Failed to persist database refresh results")?;
        Ok(Some(statuses))
    }

    async fn refresh_family(
        &self,
        update: &mut UpdateSettings,
        family: AddressFamily,
        now: DateTime<Utc>,
    ) -> RefreshStatus {
        let cadence = update.cadence();
        let allow_private = update.allow_private_sources;
        let dir = update.database_dir.clone();
        let desc = descriptor_mut(update, family);

        let (url, target) = match prepare(desc, allow_private, &dir).await {
            Ok(prepared) => prepared,
            Err(e) => {
                desc.next_refresh = Some(schedule::after_fetch(now, cadence));
                return RefreshStatus::new(family, RefreshOutcome::ConfigError, e.to_string());
            }
        };

        // A renamed source or a missing file needs a full download.
        let since = if desc.path.as_deref() == Some(target.as_path()) && target.is_file() {
            desc.last_modified
        } else {
            None
        };

        match download_database(&self.client, &url, since, &target, self.max_size).await {
            Ok(Download::NotModified) => {
                desc.last_checked = Some(now);
                let next = schedule::after_not_modified(now, cadence, schedule::random_jitter());
                desc.next_refresh = Some(next);
                RefreshStatus::new(
                    family,
                    RefreshOutcome::NotModified,
                    format!("up to date, next check {}", next.to_rfc3339()),
                )
            }
            Ok(Download::Fetched {
                last_modified,
                bytes,
            }) => {
                desc.path = Some(target.clone());
                desc.last_modified = Some(last_modified.unwrap_or(now));
                desc.last_checked = Some(now);
                desc.next_refresh = Some(schedule::after_fetch(now, cadence));
                desc.retry = 0;
                RefreshStatus::new(
                    family,
                    RefreshOutcome::Fetched,
                    format!("{} ({} bytes)", target.display(), bytes),
                )
            }
            Err(e) => {
                desc.retry = desc.retry.saturating_add(1);
                desc.next_refresh = Some(schedule::after_error(now));
                log::warn!(
                    "{} database download from {} failed (attempt {}): {}",
                    family,
                    url,
                    desc.retry,
                    e
                );
                RefreshStatus::new(family, RefreshOutcome::Error, e.to_string())
            }
        }
    }

    /// Runs a cycle every `period` while scheduled refreshes are enabled.
    ///
    /// Cycles that overlap a slow predecessor are dropped by the trigger guard.
    pub fn spawn_periodic(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let auto = match Settings::load(self.store.as_ref()).await {
                    Ok(settings) => settings.update.auto,
                    Err(e) => {
                        log::warn!("Failed to load settings for scheduled refresh: {}", e);
                        continue;
                    }
                };
                if !auto {
                    continue;
                }
                if let Err(e) = self.run_cycle(Utc::now(), false).await {
                    log::warn!("Scheduled database refresh failed: {:#}", e);
                }
            }
        })
    }
}

fn descriptor(update: &UpdateSettings, family: AddressFamily) -> &DatabaseDescriptor {
    match family {
        AddressFamily::V4 => &update.ipv4,
        AddressFamily::V6 => &update.ipv6,
    }
}

fn descriptor_mut(update: &mut UpdateSettings, family: AddressFamily) -> &mut DatabaseDescriptor {
    match family {
        AddressFamily::V4 => &mut update.ipv4,
        AddressFamily::V6 => &mut update.ipv6,
    }
}

/// Validates the source and destination, creating the database directory.
async fn prepare(
    desc: &DatabaseDescriptor,
    allow_private: bool,
    dir: &Path,
) -> Result<(Url, PathBuf), ConfigError> {
    let url = validate_download_url(&desc.source, allow_private)?;
    let base_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidUrl(format!("no file name in {}", desc.source)))?;

    if dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidPath("database directory is empty".to_string()));
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ConfigError::InvalidPath(format!("{}: {}", dir.display(), e)))?;

    Ok((url, dir.join(local_file_name(&base_name))))
}
