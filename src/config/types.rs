//! Logging options shared by the logger and the command line.

use clap::ValueEnum;
use log::LevelFilter;

/// Verbosity of the crate's own log output.
///
/// Noisy dependencies (`sqlx`, `reqwest`, `hyper`) are capped at `Info`
/// regardless of this setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Failures only
    Error,
    /// Failures and degraded paths such as provider fallbacks
    Warn,
    /// Verdicts that block, refresh outcomes
    #[default]
    Info,
    /// Every validation step
    Debug,
    /// Everything, including store access
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Log line layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colored `target [LEVEL] message` lines for terminals
    #[default]
    Plain,
    /// One JSON object per line for log shippers
    Json,
}
