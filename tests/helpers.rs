// Shared test helpers for building services over stub providers.
//
// Included by the integration test files with `mod helpers;`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use geo_gate::config::ProviderSettings;
use geo_gate::error_handling::ProviderError;
use geo_gate::geoip::RequestOptions;
use geo_gate::{
    AntiBypassGuard, FilterRegistry, GeoProvider, HmacNonceAuthority, MatchingRule,
    ProviderRegistry, Settings, SqliteStore, Store, ValidationService,
};

/// Nonce secret shared by the guards built here.
#[allow(dead_code)]
pub const SECRET: &[u8] = b"integration-secret";

/// Resolves addresses from a fixed table.
pub struct StubProvider {
    name: &'static str,
    table: HashMap<IpAddr, &'static str>,
}

impl StubProvider {
    pub fn new(name: &'static str, entries: &[(&str, &'static str)]) -> Arc<Self> {
        Arc::new(Self {
            name,
            table: entries
                .iter()
                .map(|(ip, code)| (ip.parse().expect("valid test address"), *code))
                .collect(),
        })
    }
}

#[async_trait]
impl GeoProvider for StubProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn country(
        &self,
        ip: IpAddr,
        _options: &RequestOptions,
    ) -> Result<Option<String>, ProviderError> {
        Ok(self.table.get(&ip).map(|c| c.to_string()))
    }
}

/// Always fails, as an unreachable remote service would.
#[allow(dead_code)]
pub struct DownProvider;

#[async_trait]
impl GeoProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    async fn country(
        &self,
        _ip: IpAddr,
        _options: &RequestOptions,
    ) -> Result<Option<String>, ProviderError> {
        Err(ProviderError::Unavailable("connection refused".to_string()))
    }
}

/// An in-memory SQLite store with migrations applied.
pub async fn sqlite_store() -> Arc<dyn Store> {
    Arc::new(
        SqliteStore::in_memory()
            .await
            .expect("Failed to create in-memory store"),
    )
}

/// A service whose registry holds exactly `providers`.
pub fn service(
    store: Arc<dyn Store>,
    providers: Vec<Arc<dyn GeoProvider>>,
    filters: FilterRegistry,
) -> Arc<ValidationService> {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register_instance(provider);
    }
    Arc::new(ValidationService::new(store, registry, filters))
}

/// A guard over `service` signing with [`SECRET`].
#[allow(dead_code)]
pub fn guard(service: Arc<ValidationService>) -> AntiBypassGuard {
    let nonces = HmacNonceAuthority::new(SECRET).expect("non-empty secret");
    AntiBypassGuard::new(service, Arc::new(nonces))
}

/// Allow-list settings asking `providers` in order.
pub fn allow_settings(allow: &[&str], providers: &[&str]) -> Settings {
    Settings {
        matching_rule: MatchingRule::Allow,
        allow_list: allow.iter().map(|s| s.to_string()).collect(),
        providers: providers
            .iter()
            .map(|name| ProviderSettings::enabled(*name))
            .collect(),
        ..Default::default()
    }
}
