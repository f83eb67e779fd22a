//! Validation pipeline.
//!
//! For one hook invocation the pipeline:
//! 1. gathers candidate IPs (proxy headers first, peer address last)
//! 2. resolves each through the provider chain
//! 3. applies the built-in overrides, then the integrator overrides of the hook
//! 4. runs the matching rule engine when no override decided
//! 5. stops at the first candidate that did not pass
//! 6. updates the cache, the validation log and the statistics
//! 7. builds a block response when enforcing and the result is a refusal
//!
//! `unknown` (no provider could resolve the country) is not a refusal: the
//! pipeline fails open on provider outages unless an override blocks.

mod candidates;
mod context;
mod filters;
mod record;
mod response;


use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;

use crate::cache::ValidationCache;
use crate::config::{
    LoginProtection, ProviderSettings, Settings, DEFAULT_USER_AGENT, SETTINGS_KEY,
};
use crate::error_handling::{AuthenticityError, StoreError};
use crate::geoip::{Lookup, ProviderRegistry, RequestOptions};
use crate::policy;
use crate::recording::{LogRecorder, StatisticsAggregator};
use crate::storage::{LogEntry, Store};

pub use candidates::candidate_ips;
pub use context::{Principal, RequestContext};
pub use filters::{
    BackupDirFilter, FilterRegistry, IpSourceFilter, ListExtension, ListFilter, ReasonFilter,
    RecordFilter, StatusFilter,
};
pub use record::{Hook, ValidationRecord, ValidationResult};
pub use response::{build_block_response, reason_phrase, BlockResponse};

/// What the host does with the request.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Verdict {
    /// The hook does not validate this request.
    Skipped,
    /// The request may proceed.
    Proceed(ValidationRecord),
    /// Send `response` and stop handling the request.
    Block {
        record: ValidationRecord,
        response: BlockResponse,
    },
    /// Redirect (GET only) to re-attach the authenticity token.
    Redirect { location: String },
}

impl Verdict {
    pub fn record(&self) -> Option<&ValidationRecord> {
        match self {
            Verdict::Proceed(record) | Verdict::Block { record, .. } => Some(record),
            Verdict::Skipped | Verdict::Redirect { .. } => None,
        }
    }

    pub fn response(&self) -> Option<&BlockResponse> {
        match self {
            Verdict::Block { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }

    /// The decision, if a validation ran.
    pub fn result(&self) -> Option<ValidationResult> {
        self.record().and_then(ValidationRecord::result)
    }
}

/// Per-invocation options of [`ValidationService::validate_with`].
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Build a block response when the result is a refusal
    pub enforce: bool,
    /// Outcome of the authenticity token check, when the caller required one
    pub authenticity: Option<Result<(), AuthenticityError>>,
    /// Result forced before any other override (malicious requests)
    pub forced: Option<ValidationResult>,
    /// Status code of the block response instead of the configured one
    pub response_code: Option<u16>,
}

impl ValidateOptions {
    pub fn enforcing() -> Self {
        Self {
            enforce: true,
            ..Default::default()
        }
    }
}

/// Whether `result` makes an enforcing hook send a block response.
pub fn is_refusal(result: Option<ValidationResult>) -> bool {
    matches!(
        result,
        Some(ValidationResult::Blocked) | Some(ValidationResult::Failed)
    )
}

/// The validation pipeline and its collaborators.
///
/// Constructed once per process and shared by reference.
pub struct ValidationService {
    registry: ProviderRegistry,
    filters: FilterRegistry,
    cache: ValidationCache,
    statistics: StatisticsAggregator,
    logs: LogRecorder,
    store: Arc<dyn Store>,
    user_agent: String,
}

impl ValidationService {
    pub fn new(store: Arc<dyn Store>, registry: ProviderRegistry, filters: FilterRegistry) -> Self {
        Self {
            registry,
            filters,
            cache: ValidationCache::new(Arc::clone(&store)),
            statistics: StatisticsAggregator::new(Arc::clone(&store)),
            logs: LogRecorder::new(Arc::clone(&store)),
            store,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Replaces the outbound identification string sent to providers.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn cache(&self) -> &ValidationCache {
        &self.cache
    }

    pub fn statistics(&self) -> &StatisticsAggregator {
        &self.statistics
    }

    pub fn logs(&self) -> &LogRecorder {
        &self.logs
    }

    /// Removes everything the service persisted: settings, statistics, logs
    /// and cached validations. Used when the host uninstalls the gate.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.cache.clear().await?;
        self.statistics.clear().await?;
        self.logs.clear().await?;
        self.store.delete(SETTINGS_KEY).await?;
        log::info!("Cleared all persisted gate state");
        Ok(())
    }

    fn request_options(&self, settings: &Settings) -> RequestOptions {
        RequestOptions {
            timeout: settings.timeout(),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Validates the request for `hook`.
    pub async fn validate(
        &self,
        hook: Hook,
        settings: &Settings,
        ctx: &RequestContext,
        enforce: bool,
    ) -> Verdict {
        let options = ValidateOptions {
            enforce,
            ..Default::default()
        };
        self.validate_with(hook, settings, ctx, options).await
    }

    /// Validates the request for `hook` with explicit options.
    pub async fn validate_with(
        &self,
        hook: Hook,
        settings: &Settings,
        ctx: &RequestContext,
        options: ValidateOptions,
    ) -> Verdict {
        let chain = self.registry.build_chain(settings);
        let request_options = self.request_options(settings);

        let mut outcome = None;
        for ip in candidate_ips(ctx, settings, &self.filters) {
            let mut record = chain.resolve(ip, Lookup::Country, &request_options).await;
            record.authenticated = ctx.is_authenticated();

            record = self.apply_overrides(hook, record, settings, ctx, &options).await;
            if record.result().is_none() {
                record.set_result(policy::decide_for(&record.country_code, settings));
            }

            let passed = record.is_passed();
            outcome = Some(record);
            if !passed {
                break;
            }
        }
        // candidate_ips always yields the peer address
        let Some(record) = outcome else {
            return Verdict::Skipped;
        };

        log::debug!(
            "{} validation of {}: {} ({} via {})",
            hook,
            record.ip,
            record.result().map(|r| r.to_string()).unwrap_or_default(),
            record.country_code,
            record.provider
        );

        if let Err(e) = self.cache.update(&record, hook, settings.cache_ttl()).await {
            log::warn!("Failed to update validation cache for {}: {}", record.ip, e);
        }
        self.record_outcome(hook, &record, settings, ctx).await;

        if options.enforce && is_refusal(record.result()) {
            let code = options.response_code.unwrap_or(settings.response_code);
            let response = build_block_response(hook, code, settings, ctx, &self.filters).await;
            return Verdict::Block { record, response };
        }
        Verdict::Proceed(record)
    }

    /// Built-in overrides in precedence order, then the integrator overrides.
    ///
    /// The first override to set a result wins.
    async fn apply_overrides(
        &self,
        hook: Hook,
        mut record: ValidationRecord,
        settings: &Settings,
        ctx: &RequestContext,
        options: &ValidateOptions,
    ) -> ValidationRecord {
        if let Some(forced) = options.forced {
            record.set_result(forced);
        }

        if let Some(Err(e)) = &options.authenticity {
            log::debug!("Blocking {} on {}: {}", record.ip, hook, e);
            record.set_result(ValidationResult::Blocked);
        }

        match self.cache.is_throttled(record.ip, settings.login_fails).await {
            Ok(true) => {
                log::debug!("Blocking {}: authentication failure threshold reached", record.ip);
                record.set_result(ValidationResult::Blocked);
            }
            Ok(false) => {}
            Err(e) => log::warn!("Failed to read failure counter of {}: {}", record.ip, e),
        }

        if settings.validation.login == LoginProtection::TrustAuthenticated
            && ctx.is_authenticated()
        {
            record.set_result(ValidationResult::Passed);
        }

        self.filters.apply_validation(hook, record, settings, ctx)
    }

    /// Writes the validation log line and statistics for `record`.
    ///
    /// Store failures are logged and otherwise ignored.
    pub async fn record_outcome(
        &self,
        hook: Hook,
        record: &ValidationRecord,
        settings: &Settings,
        ctx: &RequestContext,
    ) {
        let entry = LogEntry {
            time: Utc::now(),
            hook,
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            record: record.clone(),
        };
        let backup_dir = self.filters.apply_backup_dir(hook);
        if let Err(e) = self
            .logs
            .record(
                &entry,
                settings.validation.recording,
                settings.validation.max_logs,
                backup_dir.as_deref(),
            )
            .await
        {
            log::warn!("Failed to record validation log: {}", e);
        }

        if settings.save_statistics {
            if let Err(e) = self.statistics.record(record).await {
                log::warn!("Failed to update statistics: {}", e);
            }
        }
    }

    /// Resolves `ip` for administrative tools.
    ///
    /// An empty `providers` list uses the providers of `settings`.
    pub async fn lookup(
        &self,
        ip: IpAddr,
        providers: &[ProviderSettings],
        settings: &Settings,
        lookup: Lookup,
    ) -> ValidationRecord {
        let chain = if providers.is_empty() {
            self.registry.build_chain(settings)
        } else {
            self.registry.build_chain_from(providers, settings)
        };
        chain.resolve(ip, lookup, &self.request_options(settings)).await
    }
}
