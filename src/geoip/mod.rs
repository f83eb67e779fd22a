//! Geolocation providers.
//!
//! This module provides:
//! - The [`GeoProvider`] contract (country-only and full-location accessors)
//! - Remote JSON API providers sharing one HTTP client
//! - A local provider reading MaxMind-format databases per address family
//! - The [`ProviderRegistry`] mapping identifiers to constructors
//! - The [`ProviderChain`] resolving an IP with first-answer-wins fallback

mod chain;
mod local;
mod provider;
mod registry;
mod remote;
mod types;

// Re-export public API
pub use chain::ProviderChain;
pub use local::{MaxMindProvider, ReaderCache, LOCAL_PROVIDER_NAME};
pub use provider::GeoProvider;
pub use registry::{ProviderConfig, ProviderFactory, ProviderRegistry};
pub use remote::{
    Coordinates, HttpJsonProvider, ServiceProfile, BUILTIN_REMOTE, GEOPLUGIN, IPAPI_CO, IPINFO,
    IPINFODB, IP_API,
};
pub use types::{LocationRecord, Lookup, RequestOptions};
