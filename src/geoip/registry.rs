//! Provider registry.
//!
//! Maps provider identifiers to constructors. Populated once at startup; the
//! provider list of the settings is resolved against it to build a
//! [`ProviderChain`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::chain::ProviderChain;
use super::local::{MaxMindProvider, ReaderCache, LOCAL_PROVIDER_NAME};
use super::provider::GeoProvider;
use super::remote::{HttpJsonProvider, BUILTIN_REMOTE};
use crate::config::{ProviderSettings, Settings};

/// What a constructor gets to build one provider instance.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// API key from the settings, if any
    pub api_key: Option<String>,
    /// Local IPv4 database
    pub ipv4_database: Option<PathBuf>,
    /// Local IPv6 database
    pub ipv6_database: Option<PathBuf>,
}

/// Constructor of one provider.
pub type ProviderFactory = Arc<dyn Fn(&ProviderConfig) -> Arc<dyn GeoProvider> + Send + Sync>;

struct Registration {
    requires_key: bool,
    factory: ProviderFactory,
}

/// Provider identifier → constructor.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Registration>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the local database provider and every built-in
    /// remote provider, all sharing `client`.
    pub fn with_builtins(client: reqwest::Client) -> Self {
        let mut registry = Self::new();

        let readers = Arc::new(ReaderCache::new());
        registry.register(
            LOCAL_PROVIDER_NAME,
            false,
            Arc::new(move |config: &ProviderConfig| {
                Arc::new(MaxMindProvider::new(
                    config.ipv4_database.clone(),
                    config.ipv6_database.clone(),
                    Arc::clone(&readers),
                )) as Arc<dyn GeoProvider>
            }),
        );

        for profile in BUILTIN_REMOTE {
            let profile = *profile;
            let client = client.clone();
            registry.register(
                profile.name,
                profile.requires_key,
                Arc::new(move |config: &ProviderConfig| {
                    Arc::new(HttpJsonProvider::new(
                        profile,
                        client.clone(),
                        config.api_key.clone(),
                    )) as Arc<dyn GeoProvider>
                }),
            );
        }
        registry
    }

    /// Registers (or replaces) a provider constructor.
    pub fn register(&mut self, name: &str, requires_key: bool, factory: ProviderFactory) {
        self.providers.insert(
            name.to_string(),
            Registration {
                requires_key,
                factory,
            },
        );
    }

    /// Registers an already-built provider under its own name.
    pub fn register_instance(&mut self, provider: Arc<dyn GeoProvider>) {
        let name = provider.name().to_string();
        self.register(&name, false, Arc::new(move |_: &ProviderConfig| Arc::clone(&provider)));
    }

    /// Registered identifiers in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Entries of `configured` that can take part in resolution, in order.
    ///
    /// Disabled entries are skipped, as are providers that need an API key
    /// when none is configured. Unknown names are skipped with a warning.
    pub fn valid_providers<'a>(
        &self,
        configured: &'a [ProviderSettings],
    ) -> Vec<&'a ProviderSettings> {
        configured
            .iter()
            .filter(|entry| entry.enabled)
            .filter(|entry| match self.providers.get(&entry.name) {
                Some(registration) => {
                    let has_key = entry.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
                    !registration.requires_key || has_key
                }
                None => {
                    log::warn!("Ignoring unknown geolocation provider '{}'", entry.name);
                    false
                }
            })
            .collect()
    }

    /// Builds the chain for the provider list of `settings`.
    pub fn build_chain(&self, settings: &Settings) -> ProviderChain {
        self.build_chain_from(&settings.providers, settings)
    }

    /// Builds a chain for an explicit provider list (administrative lookups).
    pub fn build_chain_from(
        &self,
        configured: &[ProviderSettings],
        settings: &Settings,
    ) -> ProviderChain {
        let providers = self
            .valid_providers(configured)
            .into_iter()
            .filter_map(|entry| {
                let registration = self.providers.get(&entry.name)?;
                let config = ProviderConfig {
                    api_key: entry.api_key.clone(),
                    ipv4_database: settings.update.ipv4.path.clone(),
                    ipv6_database: settings.update.ipv6.path.clone(),
                };
                Some((registration.factory)(&config))
            })
            .collect();
        ProviderChain::new(providers)
    }
}
