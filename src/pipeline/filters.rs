//! Extension points.
//!
//! Integrators register callbacks that run synchronously in registration
//! order, each receiving the working value and returning the (possibly
//! modified) value. Validation callbacks are keyed by [`Hook`]; the remaining
//! extension points have fixed names.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use strum_macros::{AsRefStr, Display, EnumString};

use super::context::RequestContext;
use super::record::{Hook, ValidationRecord};
use crate::config::Settings;

/// Transforms the working record of one candidate IP.
pub type RecordFilter =
    Arc<dyn Fn(ValidationRecord, &Settings, &RequestContext) -> ValidationRecord + Send + Sync>;
/// Replaces the platform-reported peer address.
pub type IpSourceFilter = Arc<dyn Fn(IpAddr, &RequestContext) -> IpAddr + Send + Sync>;
/// Transforms a list of names.
pub type ListFilter = Arc<dyn Fn(Vec<String>) -> Vec<String> + Send + Sync>;
/// Chooses the backup directory of the validation log for a hook.
pub type BackupDirFilter = Arc<dyn Fn(Option<PathBuf>, Hook) -> Option<PathBuf> + Send + Sync>;
/// Overrides the status code of a block response.
pub type StatusFilter = Arc<dyn Fn(u16) -> u16 + Send + Sync>;
/// Overrides the reason phrase of a block response.
pub type ReasonFilter = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Named list-valued extension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ListExtension {
    /// Admin actions/pages exempt from the nonce check
    BypassAdmins,
    /// Plugin directory names exempt from the nonce check
    BypassPlugins,
    /// Theme directory names exempt from the nonce check
    BypassThemes,
    /// Admin ajax/post actions that have a public (unauthenticated) handler
    AdminActions,
}

/// Registered callbacks of every extension point.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    validation: HashMap<Hook, Vec<RecordFilter>>,
    ip_source: Vec<IpSourceFilter>,
    lists: HashMap<ListExtension, Vec<ListFilter>>,
    backup_dir: Vec<BackupDirFilter>,
    status: HashMap<Hook, Vec<StatusFilter>>,
    reason: HashMap<Hook, Vec<ReasonFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validation override for `hook`.
    ///
    /// Setting the record's result skips the matching rule engine.
    pub fn on_validate<F>(&mut self, hook: Hook, filter: F) -> &mut Self
    where
        F: Fn(ValidationRecord, &Settings, &RequestContext) -> ValidationRecord
            + Send
            + Sync
            + 'static,
    {
        self.validation
            .entry(hook)
            .or_default()
            .push(Arc::new(filter));
        self
    }

    /// Adds an `ip-source` callback.
    pub fn on_ip_source<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(IpAddr, &RequestContext) -> IpAddr + Send + Sync + 'static,
    {
        self.ip_source.push(Arc::new(filter));
        self
    }

    /// Adds a callback to one of the list extension points.
    pub fn on_list<F>(&mut self, extension: ListExtension, filter: F) -> &mut Self
    where
        F: Fn(Vec<String>) -> Vec<String> + Send + Sync + 'static,
    {
        self.lists
            .entry(extension)
            .or_default()
            .push(Arc::new(filter));
        self
    }

    /// Adds a `backup-dir` callback.
    pub fn on_backup_dir<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(Option<PathBuf>, Hook) -> Option<PathBuf> + Send + Sync + 'static,
    {
        self.backup_dir.push(Arc::new(filter));
        self
    }

    /// Adds a block status override for `hook`.
    pub fn on_status<F>(&mut self, hook: Hook, filter: F) -> &mut Self
    where
        F: Fn(u16) -> u16 + Send + Sync + 'static,
    {
        self.status.entry(hook).or_default().push(Arc::new(filter));
        self
    }

    /// Adds a block reason override for `hook`.
    pub fn on_reason<F>(&mut self, hook: Hook, filter: F) -> &mut Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.reason.entry(hook).or_default().push(Arc::new(filter));
        self
    }

    pub fn apply_validation(
        &self,
        hook: Hook,
        record: ValidationRecord,
        settings: &Settings,
        ctx: &RequestContext,
    ) -> ValidationRecord {
        self.validation
            .get(&hook)
            .into_iter()
            .flatten()
            .fold(record, |record, filter| filter(record, settings, ctx))
    }

    pub fn apply_ip_source(&self, ctx: &RequestContext) -> IpAddr {
        self.ip_source
            .iter()
            .fold(ctx.peer_addr, |ip, filter| filter(ip, ctx))
    }

    pub fn apply_list(&self, extension: ListExtension, defaults: Vec<String>) -> Vec<String> {
        self.lists
            .get(&extension)
            .into_iter()
            .flatten()
            .fold(defaults, |list, filter| filter(list))
    }

    pub fn apply_backup_dir(&self, hook: Hook) -> Option<PathBuf> {
        self.backup_dir
            .iter()
            .fold(None, |dir, filter| filter(dir, hook))
    }

    pub fn apply_status(&self, hook: Hook, code: u16) -> u16 {
        self.status
            .get(&hook)
            .into_iter()
            .flatten()
            .fold(code, |code, filter| filter(code))
    }

    pub fn apply_reason(&self, hook: Hook, reason: String) -> String {
        self.reason
            .get(&hook)
            .into_iter()
            .flatten()
            .fold(reason, |reason, filter| filter(reason))
    }
}
