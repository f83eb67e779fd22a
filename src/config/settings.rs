//! Policy settings.
//!
//! `Settings` is the read-only policy object the validation pipeline consumes
//! per request. It is persisted as the `settings` record of the store, carries
//! a schema version, and is upgraded in place when a record written by an
//! older version is loaded.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::constants::*;
use crate::config::headers::DEFAULT_PROXY_HEADERS;
use crate::error_handling::{ConfigError, StoreError};
use crate::storage::{get_json, set_json, Store};

/// Allow-list or deny-list policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingRule {
    /// Only countries on the allow-list pass (an empty list lets everyone pass)
    #[default]
    Allow,
    /// Countries on the deny-list are blocked
    Deny,
}

/// Which validations are written to the validation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPolicy {
    /// Nothing is recorded
    None,
    /// Blocked and unknown results
    #[default]
    Blocked,
    /// Passed results
    Passed,
    /// Requests without a logged-in principal
    Unauthenticated,
    /// Requests with a logged-in principal
    Authenticated,
    /// Everything
    All,
}

impl RecordingPolicy {
    /// Whether a validation with this outcome is recorded.
    pub fn should_record(self, blocked: bool, authenticated: bool) -> bool {
        match self {
            RecordingPolicy::None => false,
            RecordingPolicy::Blocked => blocked,
            RecordingPolicy::Passed => !blocked,
            RecordingPolicy::Unauthenticated => !authenticated,
            RecordingPolicy::Authenticated => authenticated,
            RecordingPolicy::All => true,
        }
    }

    /// Whether authentication failures and malicious direct requests are recorded.
    pub fn records_failures(self) -> bool {
        matches!(
            self,
            RecordingPolicy::Blocked | RecordingPolicy::Unauthenticated | RecordingPolicy::All
        )
    }
}

/// Login hook strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginProtection {
    /// Login is not validated
    Disabled,
    /// Every login-hook request is validated
    #[default]
    Enabled,
    /// Logged-in principals pass; login/logout form actions are not validated
    TrustAuthenticated,
}

impl LoginProtection {
    /// Whether the login hook validates at all.
    pub fn is_enabled(self) -> bool {
        self != LoginProtection::Disabled
    }
}

/// Strictness of an administrative or direct-access surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceProtection {
    /// Not validated
    #[default]
    Disabled,
    /// Country validation only
    Country,
    /// Country validation plus the authenticity token
    CountryAndNonce,
}

impl SurfaceProtection {
    /// Whether requests to the surface are validated.
    pub fn is_enabled(self) -> bool {
        self != SurfaceProtection::Disabled
    }

    /// Whether requests to the surface must carry a valid nonce.
    pub fn requires_nonce(self) -> bool {
        self >= SurfaceProtection::CountryAndNonce
    }
}

/// Per-hook validation toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationToggles {
    /// Comment and trackback submissions
    pub comment: bool,
    /// XML-RPC requests
    pub xmlrpc: bool,
    /// Login and registration
    pub login: LoginProtection,
    /// Administrative pages
    pub admin: SurfaceProtection,
    /// Administrative ajax/post endpoints
    pub ajax: SurfaceProtection,
    /// Direct requests to plugin files
    pub plugins: SurfaceProtection,
    /// Direct requests to theme files
    pub themes: SurfaceProtection,
    /// Proxy headers whose addresses are validated before the peer address
    pub proxy: Vec<String>,
    /// Validation log policy
    pub recording: RecordingPolicy,
    /// Log entries kept per hook
    pub max_logs: usize,
}

impl Default for ValidationToggles {
    fn default() -> Self {
        Self {
            comment: true,
            xmlrpc: true,
            login: LoginProtection::Enabled,
            admin: SurfaceProtection::Country,
            ajax: SurfaceProtection::Disabled,
            plugins: SurfaceProtection::Disabled,
            themes: SurfaceProtection::Disabled,
            proxy: Vec::new(),
            recording: RecordingPolicy::Blocked,
            max_logs: DEFAULT_MAX_LOGS,
        }
    }
}

impl ValidationToggles {
    /// Configured proxy headers, lower-cased; the defaults when none are set.
    pub fn proxy_headers(&self) -> Vec<String> {
        if self.proxy.is_empty() {
            return DEFAULT_PROXY_HEADERS.iter().map(|h| h.to_string()).collect();
        }
        self.proxy
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

/// One entry of the ordered provider list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Registry identifier
    pub name: String,
    /// Whether the provider takes part in resolution
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// API key for providers that need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl ProviderSettings {
    /// An enabled provider without an API key.
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            api_key: None,
        }
    }
}

/// State of one local geolocation database (one per address family).
///
/// Mutated only by the refresh scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    /// Remote source of the (compressed) database
    pub source: String,
    /// Local file path, derived from the source's base name
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Last-Modified time reported by the remote source
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    /// When the last successful check (fetched or not modified) happened
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    /// When the next refresh is due
    #[serde(default)]
    pub next_refresh: Option<DateTime<Utc>>,
    /// Consecutive failed attempts since the last success
    #[serde(default)]
    pub retry: u32,
}

impl DatabaseDescriptor {
    /// A descriptor that has never been refreshed.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            path: None,
            last_modified: None,
            last_checked: None,
            next_refresh: None,
            retry: 0,
        }
    }
}

/// Database refresh configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Whether scheduled refreshes run
    pub auto: bool,
    /// Refresh cadence in days
    pub cadence_days: u32,
    /// Accept database sources on private or loopback hosts
    pub allow_private_sources: bool,
    /// Directory holding the local databases
    pub database_dir: PathBuf,
    /// IPv4 database
    pub ipv4: DatabaseDescriptor,
    /// IPv6 database
    pub ipv6: DatabaseDescriptor,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            auto: true,
            cadence_days: DEFAULT_REFRESH_CADENCE_DAYS,
            allow_private_sources: false,
            database_dir: PathBuf::from(DEFAULT_DATABASE_DIR),
            ipv4: DatabaseDescriptor::new(DEFAULT_IPV4_SOURCE),
            ipv6: DatabaseDescriptor::new(DEFAULT_IPV6_SOURCE),
        }
    }
}

impl UpdateSettings {
    /// Refresh cadence as a chrono duration.
    pub fn cadence(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cadence_days))
    }
}

/// URL prefixes of the protected content directories (with trailing slash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentDirs {
    /// Plugin directory
    pub plugins: String,
    /// Theme directory
    pub themes: String,
    /// Administrative surface
    pub admin: String,
}

impl Default for ContentDirs {
    fn default() -> Self {
        Self {
            plugins: DEFAULT_PLUGINS_DIR.to_string(),
            themes: DEFAULT_THEMES_DIR.to_string(),
            admin: DEFAULT_ADMIN_DIR.to_string(),
        }
    }
}

/// The policy/configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Schema version the record was written with
    pub version: String,
    /// Allow-list or deny-list mode
    pub matching_rule: MatchingRule,
    /// Countries allowed in allow-list mode
    #[serde(deserialize_with = "deserialize_country_list")]
    pub allow_list: Vec<String>,
    /// Countries blocked in deny-list mode
    #[serde(deserialize_with = "deserialize_country_list")]
    pub deny_list: Vec<String>,
    /// Providers in resolution order
    pub providers: Vec<ProviderSettings>,
    /// Per-hook toggles
    pub validation: ValidationToggles,
    /// Status code sent when a request is blocked
    pub response_code: u16,
    /// Authentication failures after which an IP is forced blocked
    pub login_fails: u32,
    /// Timeout budget of one resolution in seconds
    pub timeout_secs: u64,
    /// Retention window of validation cache entries in seconds
    pub cache_ttl_secs: u64,
    /// Whether outcomes are counted in the statistics record
    pub save_statistics: bool,
    /// Landing page for 2xx block responses
    pub home_url: String,
    /// Directory with `<status>.html` pages for 4xx/5xx block responses
    pub template_dir: Option<PathBuf>,
    /// Protected content directories
    pub content_dirs: ContentDirs,
    /// Database refresh configuration
    pub update: UpdateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION.to_string(),
            matching_rule: MatchingRule::Allow,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            providers: vec![
                ProviderSettings::enabled("maxmind"),
                ProviderSettings::enabled("ipinfo.io"),
                ProviderSettings::enabled("ip-api.com"),
            ],
            validation: ValidationToggles::default(),
            response_code: DEFAULT_RESPONSE_CODE,
            login_fails: DEFAULT_LOGIN_FAILS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            save_statistics: true,
            home_url: DEFAULT_HOME_URL.to_string(),
            template_dir: None,
            content_dirs: ContentDirs::default(),
            update: UpdateSettings::default(),
        }
    }
}

impl Settings {
    /// Timeout budget of one resolution.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retention window of validation cache entries.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::InvalidSettings {
            field: field.to_string(),
            message: message.to_string(),
        };

        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be greater than 0"));
        }
        if !(200..=599).contains(&self.response_code) {
            return Err(invalid("response_code", "must be between 200 and 599"));
        }
        if self.login_fails == 0 {
            return Err(invalid("login_fails", "must be greater than 0"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(invalid("cache_ttl_secs", "must be greater than 0"));
        }
        if self.update.cadence_days == 0 {
            return Err(invalid("update.cadence_days", "must be greater than 0"));
        }
        if self.validation.max_logs == 0 {
            return Err(invalid("validation.max_logs", "must be greater than 0"));
        }
        Ok(())
    }

    /// Loads the settings record, upgrading it when its version differs.
    ///
    /// A missing record yields the defaults (not written back).
    pub async fn load(store: &dyn Store) -> Result<Self, StoreError> {
        let Some(mut settings) = get_json::<Settings>(store, SETTINGS_KEY).await? else {
            return Ok(Settings::default());
        };

        if settings.version != SETTINGS_VERSION {
            log::info!(
                "Upgrading settings from version {} to {}",
                settings.version,
                SETTINGS_VERSION
            );
            settings.version = SETTINGS_VERSION.to_string();
            settings.save(store).await?;
        }
        Ok(settings)
    }

    /// Writes the settings record.
    pub async fn save(&self, store: &dyn Store) -> Result<(), StoreError> {
        set_json(store, SETTINGS_KEY, self, None).await
    }
}

/// Normalizes a country code to two-letter upper-case form.
pub fn normalize_country_code(value: &str) -> Option<String> {
    let code = value.trim();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

/// Normalizes, deduplicates and preserves the order of a country list.
pub fn normalize_country_list<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for value in values {
        if let Some(code) = normalize_country_code(value.as_ref()) {
            if seen.insert(code.clone()) {
                normalized.push(code);
            }
        }
    }
    normalized
}

fn deserialize_country_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CountryList {
        Text(String),
        Items(Vec<String>),
    }

    let items = match CountryList::deserialize(deserializer)? {
        CountryList::Text(text) => text
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_string)
            .collect::<Vec<_>>(),
        CountryList::Items(items) => items,
    };
    Ok(normalize_country_list(&items))
}
