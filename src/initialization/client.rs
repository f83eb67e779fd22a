//! Outbound HTTP client construction.

use std::time::Duration;

use reqwest::ClientBuilder;

use crate::config::{Settings, DEFAULT_USER_AGENT};
use crate::error_handling::InitializationError;

/// Builds the client shared by remote providers and database downloads.
///
/// The per-request timeout is the validation budget from the settings; the
/// downloader raises it per request. The user agent identifies the crate to
/// provider services.
///
/// # Errors
///
/// Returns `InitializationError::HttpClientError` if the TLS backend cannot be
/// initialized.
pub fn init_client(
    settings: &Settings,
    user_agent: Option<&str>,
) -> Result<reqwest::Client, InitializationError> {
    let client = ClientBuilder::new()
        .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
        .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()?;
    Ok(client)
}
