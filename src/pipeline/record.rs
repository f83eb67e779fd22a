//! Validation record types.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::config::UNKNOWN_COUNTRY;
use crate::geoip::LocationRecord;

/// A named request-lifecycle validation point.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Hook {
    /// Comment and trackback submission
    Comment,
    /// XML-RPC endpoint
    Xmlrpc,
    /// Login and registration
    Login,
    /// Administrative pages, ajax and post endpoints
    Admin,
    /// Direct requests to files under the plugin/theme directories
    Direct,
}

/// Outcome of one validation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValidationResult {
    /// The request may proceed.
    Passed,
    /// The request is refused.
    Blocked,
    /// The country could not be determined and no override decided.
    Unknown,
    /// An authentication attempt from this address failed.
    Failed,
}

/// The result of one resolution attempt for one IP address.
///
/// `result` is written at most once: the first override (or the matching
/// rule engine) that decides wins, and later writers are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Validated address
    pub ip: IpAddr,
    /// Two-letter country code, or `ZZ` when unresolved
    pub country_code: String,
    /// Provider that answered, or `ZZ` when none did
    pub provider: String,
    /// Resolution latency
    pub elapsed: Duration,
    /// Whether the request belonged to a logged-in principal
    pub authenticated: bool,
    /// Full location when the caller asked for it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationRecord>,
    result: Option<ValidationResult>,
}

impl ValidationRecord {
    /// A record for an address no provider could resolve.
    pub fn unresolved(ip: IpAddr) -> Self {
        Self {
            ip,
            country_code: UNKNOWN_COUNTRY.to_string(),
            provider: UNKNOWN_COUNTRY.to_string(),
            elapsed: Duration::ZERO,
            authenticated: false,
            location: None,
            result: None,
        }
    }

    /// A record for an address resolved to `country_code` by `provider`.
    pub fn resolved(
        ip: IpAddr,
        country_code: impl Into<String>,
        provider: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            ip,
            country_code: country_code.into(),
            provider: provider.into(),
            elapsed,
            authenticated: false,
            location: None,
            result: None,
        }
    }

    /// The decision, if one has been made.
    pub fn result(&self) -> Option<ValidationResult> {
        self.result
    }

    /// Records the decision unless one was already made.
    ///
    /// Returns `true` when this call set the result.
    pub fn set_result(&mut self, result: ValidationResult) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(result);
        true
    }

    /// Builder form of [`set_result`](Self::set_result).
    pub fn with_result(mut self, result: ValidationResult) -> Self {
        self.set_result(result);
        self
    }

    /// Whether a provider resolved the country.
    pub fn is_resolved(&self) -> bool {
        self.country_code != UNKNOWN_COUNTRY
    }

    /// Whether the decision is `passed`.
    pub fn is_passed(&self) -> bool {
        self.result == Some(ValidationResult::Passed)
    }
}
