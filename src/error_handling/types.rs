//! Error type definitions.
//!
//! This module defines the error taxonomy used throughout the crate. Each kind
//! has a fixed recovery path: provider errors are absorbed by the provider
//! chain, configuration errors are reported to the caller of the refresh
//! subsystem, authenticity errors force a blocked result, and traversal errors
//! end the request.

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),
}

/// Failure of a single geolocation provider.
///
/// Never surfaced to the requester; the chain falls back to the next provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Network-level failure (connect, TLS, body read).
    #[error("provider transport error: {0}")]
    Transport(#[from] ReqwestError),

    /// The shared timeout budget ran out before the provider answered.
    #[error("provider timed out")]
    Timeout,

    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {0}")]
    Status(u16),

    /// The provider answered but the payload could not be interpreted.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The provider cannot serve lookups (e.g. its local database is missing).
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Invalid configuration detected by the refresh subsystem or settings validation.
///
/// Reported as a status/message pair and never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A database source URL is not a usable http(s) URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A destination path is not an acceptable absolute directory.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A settings field holds an out-of-range value.
    #[error("Invalid setting '{field}': {message}")]
    InvalidSettings {
        /// Name of the offending field
        field: String,
        /// What is wrong with it
        message: String,
    },
}

/// A request to the administrative surface lacked a valid authenticity token.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticityError {
    /// No token in the request, its form referer or its Referer header.
    #[error("authenticity token missing")]
    Missing,

    /// A token was presented but does not verify for this principal and purpose.
    #[error("authenticity token invalid")]
    Invalid,
}

/// A direct file request was rejected as malicious.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalError {
    /// The request path contains an embedded NUL byte.
    #[error("null byte in request path")]
    NullByte,

    /// The canonical path does not lie under the declared root.
    #[error("request path escapes the content root")]
    EscapesRoot,

    /// The resolved file does not carry the expected script extension.
    #[error("unexpected file extension")]
    BadExtension,

    /// The path is well-formed and contained but names no existing file.
    #[error("requested file does not exist")]
    NotFound,
}

/// Failure of the host key/value store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQL execution error.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Migration error while preparing the SQLite schema.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A counter value stored under the key is not an integer.
    #[error("Value under '{0}' is not a counter")]
    NotACounter(String),

    /// The database file could not be created.
    #[error("Database file creation error: {0}")]
    FileCreation(String),

    /// Writing a backup log file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one database download attempt.
///
/// Counted as a refresh error: the scheduler retries after the retry delay.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network-level failure.
    #[error("download failed: {0}")]
    Transport(#[from] ReqwestError),

    /// The source answered with a status other than 200 or 304.
    #[error("download returned HTTP {status} {reason}")]
    Status {
        /// Status code
        status: u16,
        /// Reason phrase
        reason: String,
    },

    /// The body exceeds the download size cap.
    #[error("download too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Observed or announced size
        size: u64,
        /// Configured cap
        max: usize,
    },

    /// The body could not be decompressed or the archive lacks a database.
    #[error("archive error: {0}")]
    Archive(String),

    /// Writing the database file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
