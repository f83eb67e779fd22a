//! Remote HTTP geolocation providers.
//!
//! Every built-in remote provider is a JSON API: one URL template and a map
//! from response fields to [`LocationRecord`] fields. They share
//! [`HttpJsonProvider`].

use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde_json::Value;

use super::provider::{usable_country_code, GeoProvider};
use super::types::{LocationRecord, RequestOptions};
use crate::error_handling::ProviderError;

/// Where a provider reports coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinates {
    /// Separate latitude and longitude fields (numbers or numeric strings)
    Separate(&'static str, &'static str),
    /// One `"lat,lon"` string field
    Joined(&'static str),
}

/// Static description of a remote JSON provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    /// Registry identifier
    pub name: &'static str,
    /// Endpoint with an `{ip}` placeholder
    pub url_template: &'static str,
    /// Query parameter carrying the API key
    pub key_param: Option<&'static str>,
    /// Whether the provider refuses to work without a key
    pub requires_key: bool,
    /// Field holding the two-letter country code
    pub country_code: &'static str,
    pub country_name: Option<&'static str>,
    pub region: Option<&'static str>,
    pub city: Option<&'static str>,
    pub coordinates: Option<Coordinates>,
    pub timezone: Option<&'static str>,
}

pub const IPINFO: ServiceProfile = ServiceProfile {
    name: "ipinfo.io",
    url_template: "https://ipinfo.io/{ip}/json",
    key_param: Some("token"),
    requires_key: false,
    country_code: "country",
    country_name: None,
    region: Some("region"),
    city: Some("city"),
    coordinates: Some(Coordinates::Joined("loc")),
    timezone: Some("timezone"),
};

pub const IP_API: ServiceProfile = ServiceProfile {
    name: "ip-api.com",
    url_template: "http://ip-api.com/json/{ip}",
    key_param: None,
    requires_key: false,
    country_code: "countryCode",
    country_name: Some("country"),
    region: Some("regionName"),
    city: Some("city"),
    coordinates: Some(Coordinates::Separate("lat", "lon")),
    timezone: Some("timezone"),
};

pub const GEOPLUGIN: ServiceProfile = ServiceProfile {
    name: "geoplugin",
    url_template: "http://www.geoplugin.net/json.gp?ip={ip}",
    key_param: None,
    requires_key: false,
    country_code: "geoplugin_countryCode",
    country_name: Some("geoplugin_countryName"),
    region: Some("geoplugin_region"),
    city: Some("geoplugin_city"),
    coordinates: Some(Coordinates::Separate(
        "geoplugin_latitude",
        "geoplugin_longitude",
    )),
    timezone: Some("geoplugin_timezone"),
};

pub const IPAPI_CO: ServiceProfile = ServiceProfile {
    name: "ipapi.co",
    url_template: "https://ipapi.co/{ip}/json/",
    key_param: Some("key"),
    requires_key: false,
    country_code: "country_code",
    country_name: Some("country_name"),
    region: Some("region"),
    city: Some("city"),
    coordinates: Some(Coordinates::Separate("latitude", "longitude")),
    timezone: Some("timezone"),
};

pub const IPINFODB: ServiceProfile = ServiceProfile {
    name: "ipinfodb",
    url_template: "https://api.ipinfodb.com/v3/ip-city/?format=json&ip={ip}",
    key_param: Some("key"),
    requires_key: true,
    country_code: "countryCode",
    country_name: Some("countryName"),
    region: Some("regionName"),
    city: Some("cityName"),
    coordinates: Some(Coordinates::Separate("latitude", "longitude")),
    timezone: Some("timeZone"),
};

/// All built-in remote providers.
pub const BUILTIN_REMOTE: &[ServiceProfile] = &[IPINFO, IP_API, GEOPLUGIN, IPAPI_CO, IPINFODB];

/// A remote JSON provider.
pub struct HttpJsonProvider {
    profile: ServiceProfile,
    endpoint: String,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpJsonProvider {
    pub fn new(
        profile: ServiceProfile,
        client: reqwest::Client,
        api_key: Option<String>,
    ) -> Self {
        Self {
            profile,
            endpoint: profile.url_template.to_string(),
            client,
            api_key,
        }
    }

    /// Replaces the endpoint template (must contain `{ip}`).
    pub fn with_endpoint(mut self, template: impl Into<String>) -> Self {
        self.endpoint = template.into();
        self
    }

    async fn fetch(&self, ip: IpAddr, options: &RequestOptions) -> Result<Value, ProviderError> {
        let url = self.endpoint.replace("{ip}", &ip.to_string());
        let mut request = self
            .client
            .get(&url)
            .timeout(options.timeout)
            .header(USER_AGENT, &options.user_agent);
        if let (Some(param), Some(key)) = (self.profile.key_param, self.api_key.as_deref()) {
            request = request.query(&[(param, key)]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Transport(e)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    fn to_location(&self, body: &Value) -> Option<LocationRecord> {
        let country_code = usable_country_code(text_field(body, self.profile.country_code))?;
        let (latitude, longitude) = match self.profile.coordinates {
            Some(Coordinates::Separate(lat, lon)) => (number_field(body, lat), number_field(body, lon)),
            Some(Coordinates::Joined(field)) => split_coordinates(text_field(body, field)),
            None => (None, None),
        };

        Some(LocationRecord {
            country_code: Some(country_code),
            country_name: optional_text(body, self.profile.country_name),
            region: optional_text(body, self.profile.region),
            city: optional_text(body, self.profile.city),
            latitude,
            longitude,
            timezone: optional_text(body, self.profile.timezone),
        })
    }
}

#[async_trait]
impl GeoProvider for HttpJsonProvider {
    fn name(&self) -> &str {
        self.profile.name
    }

    async fn country(
        &self,
        ip: IpAddr,
        options: &RequestOptions,
    ) -> Result<Option<String>, ProviderError> {
        let body = self.fetch(ip, options).await?;
        Ok(usable_country_code(text_field(&body, self.profile.country_code)))
    }

    async fn location(
        &self,
        ip: IpAddr,
        options: &RequestOptions,
    ) -> Result<Option<LocationRecord>, ProviderError> {
        let body = self.fetch(ip, options).await?;
        Ok(self.to_location(&body))
    }
}

fn text_field<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)?.as_str()
}

fn optional_text(body: &Value, field: Option<&str>) -> Option<String> {
    text_field(body, field?)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "-")
        .map(str::to_string)
}

fn number_field(body: &Value, field: &str) -> Option<f64> {
    match body.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn split_coordinates(joined: Option<&str>) -> (Option<f64>, Option<f64>) {
    let Some((lat, lon)) = joined.and_then(|s| s.split_once(',')) else {
        return (None, None);
    };
    (lat.trim().parse().ok(), lon.trim().parse().ok())
}
