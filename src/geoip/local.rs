//! Local MaxMind database provider.
//!
//! One `.mmdb` file per address family, as described by the IPv4/IPv6
//! database descriptors. Readers are cached by path and reloaded when the file
//! is replaced (modification time changes), so a refresh takes effect without
//! restarting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use maxminddb::Reader;

use super::provider::{usable_country_code, GeoProvider};
use super::types::{LocationRecord, RequestOptions};
use crate::error_handling::ProviderError;

/// Registry identifier of the local provider.
pub const LOCAL_PROVIDER_NAME: &str = "maxmind";

struct LoadedDatabase {
    modified: SystemTime,
    reader: Arc<Reader<Vec<u8>>>,
}

/// Readers shared by every [`MaxMindProvider`] built from one registry.
#[derive(Default)]
pub struct ReaderCache {
    loaded: RwLock<HashMap<PathBuf, LoadedDatabase>>,
}

impl ReaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a reader for `path`, (re)loading it when the file changed.
    async fn reader(&self, path: &Path) -> Result<Arc<Reader<Vec<u8>>>, ProviderError> {
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| ProviderError::Unavailable(format!("{}: {}", path.display(), e)))?;

        if let Ok(loaded) = self.loaded.read() {
            if let Some(db) = loaded.get(path) {
                if db.modified == modified {
                    return Ok(Arc::clone(&db.reader));
                }
            }
        }

        let reader = Arc::new(load_from_file(path).await?);
        if let Ok(mut loaded) = self.loaded.write() {
            loaded.insert(
                path.to_path_buf(),
                LoadedDatabase {
                    modified,
                    reader: Arc::clone(&reader),
                },
            );
        }
        Ok(reader)
    }
}

/// Loads a database file into memory.
pub(crate) async fn load_from_file(path: &Path) -> Result<Reader<Vec<u8>>, ProviderError> {
    log::info!("Loading geolocation database from: {}", path.display());

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ProviderError::Unavailable(format!("{}: {}", path.display(), e)))?;

    Reader::from_source(bytes).map_err(|e| {
        ProviderError::Malformed(format!(
            "Failed to parse geolocation database {}: {}",
            path.display(),
            e
        ))
    })
}

/// Provider answering from local MaxMind-format databases.
pub struct MaxMindProvider {
    ipv4: Option<PathBuf>,
    ipv6: Option<PathBuf>,
    cache: Arc<ReaderCache>,
}

impl MaxMindProvider {
    pub fn new(ipv4: Option<PathBuf>, ipv6: Option<PathBuf>, cache: Arc<ReaderCache>) -> Self {
        Self { ipv4, ipv6, cache }
    }

    fn path_for(&self, ip: IpAddr) -> Result<&Path, ProviderError> {
        let path = match ip {
            IpAddr::V4(_) => self.ipv4.as_deref(),
            IpAddr::V6(_) => self.ipv6.as_deref(),
        };
        path.ok_or_else(|| {
            ProviderError::Unavailable(format!("no local database for {}", family(ip)))
        })
    }

    async fn lookup(&self, ip: IpAddr) -> Result<Option<LocationRecord>, ProviderError> {
        let reader = self.cache.reader(self.path_for(ip)?).await?;

        // maxminddb 0.27 API: lookup() returns Result<LookupResult, MaxMindDbError>
        // Use has_data() to check if data exists, then decode() to get the record
        let result = reader
            .lookup(ip)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        if !result.has_data() {
            return Ok(None);
        }

        let city: maxminddb::geoip2::City = match result.decode() {
            Ok(Some(city)) => city,
            Ok(None) => return Ok(None),
            Err(e) => return Err(ProviderError::Malformed(e.to_string())),
        };

        let Some(country_code) = usable_country_code(city.country.iso_code) else {
            return Ok(None);
        };

        Ok(Some(LocationRecord {
            country_code: Some(country_code),
            country_name: city.country.names.english.map(|s| s.to_string()),
            region: city
                .subdivisions
                .first()
                .and_then(|s| s.names.english)
                .map(|s| s.to_string()),
            city: city.city.names.english.map(|s| s.to_string()),
            latitude: city.location.latitude,
            longitude: city.location.longitude,
            timezone: city.location.time_zone.map(|s| s.to_string()),
        }))
    }
}

fn family(ip: IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "IPv4",
        IpAddr::V6(_) => "IPv6",
    }
}

#[async_trait]
impl GeoProvider for MaxMindProvider {
    fn name(&self) -> &str {
        LOCAL_PROVIDER_NAME
    }

    async fn country(
        &self,
        ip: IpAddr,
        _options: &RequestOptions,
    ) -> Result<Option<String>, ProviderError> {
        Ok(self.lookup(ip).await?.and_then(|l| l.country_code))
    }

    async fn location(
        &self,
        ip: IpAddr,
        _options: &RequestOptions,
    ) -> Result<Option<LocationRecord>, ProviderError> {
        self.lookup(ip).await
    }
}
