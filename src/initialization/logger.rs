//! Diagnostic logger setup.
//!
//! This is the process log (`log` facade over `env_logger`), separate from the
//! validation log kept by the recording module.

use std::io::Write;

use colored::*;
use log::{Level, LevelFilter};

use crate::config::LogFormat;
use crate::error_handling::InitializationError;

/// Dependencies that are chatty at debug level.
const NOISY_MODULES: &[&str] = &["sqlx", "reqwest", "hyper", "hyper_util"];

/// Initializes the logger with the given level and format.
///
/// `RUST_LOG` is read first; `level` then overrides the default filter so
/// `--log-level` always wins for this crate. Noisy dependencies are capped at
/// `Info`.
///
/// # Errors
///
/// Returns `InitializationError::LoggerError` if a logger is already installed.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=geo_gate=debug geo-gate check 203.0.113.7 --hook login
/// geo-gate --log-level debug --log-format json refresh
/// ```
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitializationError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    for module in NOISY_MODULES {
        builder.filter_module(module, level.min(LevelFilter::Info));
    }
    builder.filter_module("geo_gate", level);

    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{}",
                    json_line(
                        chrono::Utc::now().timestamp_millis(),
                        record.level(),
                        record.target(),
                        &record.args().to_string(),
                    )
                )
            });
        }
        LogFormat::Plain => {
            colored::control::set_override(true);
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] {}",
                    record.target().cyan(),
                    colored_level(record.level()),
                    record.args()
                )
            });
        }
    }

    // try_init so repeated initialization in tests reports instead of panicking
    builder.try_init().map_err(InitializationError::from)?;
    Ok(())
}

fn colored_level(level: Level) -> ColoredString {
    let name = level.to_string();
    match level {
        Level::Error => name.red(),
        Level::Warn => name.yellow(),
        Level::Info => name.green(),
        Level::Debug => name.blue(),
        Level::Trace => name.purple(),
    }
}

/// One JSON object per log line: `ts` (epoch millis), `level`, `target`, `msg`.
fn json_line(ts: i64, level: Level, target: &str, msg: &str) -> String {
    serde_json::json!({
        "ts": ts,
        "level": level.as_str(),
        "target": target,
        "msg": msg,
    })
    .to_string()
}
