//! Process-wide resource setup.
//!
//! - Diagnostic logger (`env_logger`, plain or JSON)
//! - Shared outbound HTTP client
//!
//! All initialization functions return `InitializationError`.

mod client;
mod logger;

// Re-export public API
pub use client::init_client;
pub use logger::init_logger_with;
