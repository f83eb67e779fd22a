//! Geolocation data structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};

/// Full location of an IP address.
///
/// Providers fill in what they know; only `country_code` takes part in
/// policy decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

/// Per-call options handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Time the provider may spend on this call
    pub timeout: Duration,
    /// Outbound identification string (sent as User-Agent)
    pub user_agent: String,
}

impl RequestOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Same options with a shorter timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: self.user_agent.clone(),
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

/// Which provider accessor a resolution uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lookup {
    /// Country code only (policy decisions)
    #[default]
    Country,
    /// Full location (administrative lookups)
    Location,
}
