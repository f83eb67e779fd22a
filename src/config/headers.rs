//! HTTP header name constants.
//!
//! Header names are lower-case; `RequestContext` stores header names lower-cased
//! so lookups are case-insensitive.

// Proxy headers that may carry the originating client address
/// X-Forwarded-For header - comma-separated chain of client and proxies
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// X-Real-IP header
pub const X_REAL_IP: &str = "x-real-ip";
/// Client-IP header
pub const CLIENT_IP: &str = "client-ip";

/// Proxy headers trusted when settings do not name any.
pub const DEFAULT_PROXY_HEADERS: &[&str] = &[X_FORWARDED_FOR];

// Request headers read by the guard
/// Referer header (used to recover a nonce from the page that linked here)
pub const REFERER: &str = "referer";
/// Content-Type header
pub const CONTENT_TYPE: &str = "content-type";

// Response headers written by block responses
/// Refresh header (2xx block responses)
pub const REFRESH: &str = "Refresh";
/// Location header (3xx block responses and nonce redirects)
pub const LOCATION: &str = "Location";
/// Cache-Control header
pub const CACHE_CONTROL: &str = "Cache-Control";
/// Value sent with every block response so intermediaries never cache it
pub const NO_CACHE: &str = "no-cache, must-revalidate, max-age=0";
