//! Provider chain with silent fallback.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::time::{timeout, Instant};

use super::provider::GeoProvider;
use super::types::{Lookup, RequestOptions};
use crate::error_handling::ProviderError;
use crate::pipeline::ValidationRecord;

/// Ordered providers tried one after another until one answers.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn GeoProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn GeoProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolves `ip` under the shared timeout budget of `options`.
    ///
    /// The first provider returning a usable country code wins and no further
    /// providers are called. Provider errors and timeouts only move the chain
    /// to the next provider. When the budget runs out or nobody answers, the
    /// record carries the `ZZ` sentinel for both country and provider.
    pub async fn resolve(
        &self,
        ip: IpAddr,
        lookup: Lookup,
        options: &RequestOptions,
    ) -> ValidationRecord {
        let started = Instant::now();
        let deadline = started + options.timeout;

        for provider in &self.providers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!("Timeout budget exhausted resolving {}", ip);
                break;
            }
            let call_options = options.with_timeout(remaining);

            let answer = match lookup {
                Lookup::Country => timeout(remaining, provider.country(ip, &call_options))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout))
                    .map(|code| code.map(|c| (c, None))),
                Lookup::Location => timeout(remaining, provider.location(ip, &call_options))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout))
                    .map(|location| {
                        location.and_then(|l| l.country_code.clone().map(|c| (c, Some(l))))
                    }),
            };

            match answer {
                Ok(Some((country_code, location))) => {
                    let mut record = ValidationRecord::resolved(
                        ip,
                        country_code,
                        provider.name(),
                        started.elapsed(),
                    );
                    record.location = location;
                    return record;
                }
                Ok(None) => {
                    log::debug!("{} has no answer for {}", provider.name(), ip);
                }
                Err(e) => {
                    log::debug!("{} failed for {}: {}", provider.name(), ip, e);
                }
            }
        }

        let mut record = ValidationRecord::unresolved(ip);
        record.elapsed = started.elapsed();
        record
    }
}
