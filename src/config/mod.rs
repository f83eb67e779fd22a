//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (defaults, store keys, limits)
//! - HTTP header name constants
//! - CLI option types
//! - The persisted policy settings record

mod constants;
mod headers;
mod settings;
mod types;

// Re-export all constants
pub use constants::*;
pub use headers::*;
pub use settings::{
    normalize_country_code, normalize_country_list, ContentDirs, DatabaseDescriptor,
    LoginProtection, MatchingRule, ProviderSettings, RecordingPolicy, Settings, SurfaceProtection,
    UpdateSettings, ValidationToggles,
};
pub use types::{LogFormat, LogLevel};
