//! The geolocation provider contract.

use std::net::IpAddr;

use async_trait::async_trait;

use super::types::{LocationRecord, RequestOptions};
use crate::config::normalize_country_code;
use crate::error_handling::ProviderError;

/// One geolocation source.
///
/// `Ok(None)` means the provider answered but does not know the address;
/// errors mean it could not answer at all. Both make the chain move on.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Registry identifier, reported as the record's `provider`.
    fn name(&self) -> &str;

    /// Resolves the two-letter country code of `ip`.
    async fn country(
        &self,
        ip: IpAddr,
        options: &RequestOptions,
    ) -> Result<Option<String>, ProviderError>;

    /// Resolves the full location of `ip`.
    ///
    /// Providers without richer data answer with the country alone.
    async fn location(
        &self,
        ip: IpAddr,
        options: &RequestOptions,
    ) -> Result<Option<LocationRecord>, ProviderError> {
        Ok(self.country(ip, options).await?.map(|code| LocationRecord {
            country_code: Some(code),
            ..Default::default()
        }))
    }
}

/// Turns a raw provider value into a usable country code.
///
/// Empty strings, placeholders such as `-` and the `ZZ` sentinel count as
/// "no answer".
pub(crate) fn usable_country_code(raw: Option<&str>) -> Option<String> {
    let code = normalize_country_code(raw?)?;
    if code == crate::config::UNKNOWN_COUNTRY {
        return None;
    }
    Some(code)
}
