//! geo_gate library: geolocation-based request validation
//!
//! This library decides whether an inbound request may proceed based on the
//! country its origin IP resolves to, and guards administrative surfaces
//! against requests that bypass the normal entry points.
//!
//! The pieces:
//! - a fallback chain of geolocation providers (remote HTTP services and local
//!   MaxMind databases)
//! - an allow/deny matching rule over country codes
//! - a per-IP result cache that also counts login failures
//! - nonce-based request authenticity for admin, plugin and theme surfaces
//! - a scheduler that keeps the local databases fresh
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geo_gate::{
//!     FilterRegistry, Hook, MemoryStore, ProviderRegistry, RequestContext, Settings,
//!     ValidationService,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let settings = Settings::load(store.as_ref()).await?;
//! let client = geo_gate::initialization::init_client(&settings, None)?;
//! let service = ValidationService::new(
//!     store,
//!     ProviderRegistry::with_builtins(client),
//!     FilterRegistry::new(),
//! );
//!
//! let ctx = RequestContext::new("203.0.113.7".parse()?, "POST", "/wp-login.php");
//! let verdict = service.validate(Hook::Login, &settings, &ctx, true).await;
//! if let Some(response) = verdict.response() {
//!     println!("refused with {}", response.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime.

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error_handling;
pub mod geoip;
pub mod guard;
pub mod initialization;
pub mod pipeline;
pub mod policy;
pub mod recording;
pub mod refresh;
pub mod security;
pub mod storage;

// Re-export public API
pub use cache::{CacheEntry, ValidationCache};
pub use config::{LogFormat, LogLevel, MatchingRule, Settings};
pub use geoip::{GeoProvider, LocationRecord, Lookup, ProviderChain, ProviderRegistry};
pub use guard::{AntiBypassGuard, DirectAccess, HmacNonceAuthority, NonceAuthority};
pub use pipeline::{
    BlockResponse, FilterRegistry, Hook, Principal, RequestContext, ValidationRecord,
    ValidationResult, ValidationService, Verdict,
};
pub use recording::{LogRecorder, Statistics, StatisticsAggregator};
pub use refresh::{DatabaseRefreshScheduler, RefreshOutcome, RefreshStatus};
pub use storage::{MemoryStore, SqliteStore, Store};
