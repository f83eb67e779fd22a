//! Error handling.
//!
//! This module provides the error taxonomy of the crate:
//! - **ProviderError**: recovered locally by provider-chain fallback
//! - **ConfigError**: reported to the caller of the refresh subsystem
//! - **AuthenticityError**: turned into a forced `blocked` result
//! - **TraversalError**: fatal for the current request
//! - **DownloadError**: a failed refresh attempt, retried by the scheduler
//! - **StoreError** / **InitializationError**: infrastructure failures

mod types;

// Re-export public API
pub use types::{
    AuthenticityError, ConfigError, DownloadError, InitializationError, ProviderError,
    StoreError, TraversalError,
};
