//! Configuration constants.
//!
//! This module defines the constants used throughout the crate, including the
//! unresolved-country sentinel, cache and scheduling windows, and size limits.

use std::time::Duration;

/// Settings schema version stamped into the persisted `settings` record.
///
/// A stored record carrying a different version is upgraded at load time.
pub const SETTINGS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserved country code meaning "could not be determined".
///
/// Also used as the provider identifier when no provider answered.
pub const UNKNOWN_COUNTRY: &str = "ZZ";

// Persisted record names
/// Store key of the policy/configuration record
pub const SETTINGS_KEY: &str = "settings";
/// Store key of the statistics record
pub const STATISTICS_KEY: &str = "statistics";
/// Key prefix of per-IP cache entries
pub const CACHE_KEY_PREFIX: &str = "cache:";
/// Key prefix of per-IP authentication failure counters
pub const FAIL_KEY_PREFIX: &str = "fail:";

// Validation cache
/// Default retention window of a cache entry in seconds (1 hour)
/// Fixed duration, independent of request volume
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;
/// Default number of authentication failures before an IP is forced blocked
pub const DEFAULT_LOGIN_FAILS: u32 = 5;

// Provider requests
/// Default timeout budget for one resolution, shared by all providers of a chain
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;
/// Outbound identification string sent to geolocation providers
pub const DEFAULT_USER_AGENT: &str = concat!("geo_gate/", env!("CARGO_PKG_VERSION"));

// Block responses
/// Default status code sent when a request is blocked
pub const DEFAULT_RESPONSE_CODE: u16 = 403;
/// Neutral sinkhole address used for 3xx block responses
pub const SINKHOLE_URL: &str = "http://blackhole.webpagetest.org/";
/// Landing page used for 2xx block responses when no home URL is configured
pub const DEFAULT_HOME_URL: &str = "/";

// Recorded logs
/// Default number of log entries kept per hook
pub const DEFAULT_MAX_LOGS: usize = 100;

// Nonce
/// Query/form parameter carrying the admin authenticity token
pub const NONCE_PARAM: &str = "geo-gate-auth-nonce";
/// Purpose string the admin authenticity token is scoped to
pub const NONCE_ACTION: &str = "geo-gate-auth-nonce";
/// Form field in which admin forms embed the URL of the page that rendered them
pub const FORM_REFERER_FIELD: &str = "_http_referer";
/// Validity window of a nonce (two half-window ticks)
pub const NONCE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
/// Environment variable holding the nonce signing secret
pub const NONCE_SECRET_ENV: &str = "GEO_GATE_NONCE_SECRET";

// Database refresh
/// Default refresh cadence in days
pub const DEFAULT_REFRESH_CADENCE_DAYS: u32 = 30;
/// Delay before retrying a failed refresh (one day)
pub const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);
/// Lower bound of the jitter added after a not-modified response (one day)
pub const REFRESH_JITTER_MIN: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound of the jitter added after a not-modified response (six days)
pub const REFRESH_JITTER_MAX: Duration = Duration::from_secs(6 * 24 * 60 * 60);
/// Timeout for one database download (large files)
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Maximum accepted size of a downloaded database archive (100MB)
pub const MAX_DATABASE_DOWNLOAD_SIZE: usize = 100 * 1024 * 1024;
/// Default directory holding local geolocation databases
pub const DEFAULT_DATABASE_DIR: &str = "./database";
/// Default IPv4 database source
pub const DEFAULT_IPV4_SOURCE: &str =
    "https://download.db-ip.com/free/dbip-country-lite.mmdb.gz";
/// Default IPv6 database source
pub const DEFAULT_IPV6_SOURCE: &str =
    "https://download.db-ip.com/free/dbip-country-lite.mmdb.gz";

// Direct file access
/// Script extension a rewritten direct request must carry
pub const DIRECT_SCRIPT_EXTENSION: &str = "php";
/// Index file served when a direct request names a directory
pub const DIRECT_INDEX_FILE: &str = "index.php";
/// Default URL prefix of the plugin directory
pub const DEFAULT_PLUGINS_DIR: &str = "/wp-content/plugins/";
/// Default URL prefix of the theme directory
pub const DEFAULT_THEMES_DIR: &str = "/wp-content/themes/";
/// Default URL prefix of the administrative surface
pub const DEFAULT_ADMIN_DIR: &str = "/wp-admin/";

// Administrative surface
/// Endpoint of asynchronous admin actions
pub const ADMIN_AJAX_ENDPOINT: &str = "admin-ajax.php";
/// Endpoint of admin form posts
pub const ADMIN_POST_ENDPOINT: &str = "admin-post.php";
/// Actions/pages that never carry a nonce (uploaders post outside the page)
pub const DEFAULT_BYPASS_ADMINS: &[&str] = &["upload-attachment", "imgedit-preview", "bp_avatar_upload"];
/// Login form actions exempt from validation for trusted principals
pub const LOGIN_FORM_ACTIONS: &[&str] = &["login", "logout"];
/// Where a logout is redirected so the nonce check does not block it
pub const LOGOUT_REDIRECT: &str = "wp-login.php?loggedout=true";

// HTTP status codes (for clarity and consistency)
/// 304 Not Modified
pub const HTTP_STATUS_NOT_MODIFIED: u16 = 304;
/// 404 Not Found
pub const HTTP_STATUS_NOT_FOUND: u16 = 404;
