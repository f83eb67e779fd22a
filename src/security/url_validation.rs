//! Download source validation.
//!
//! Database sources are fetched by a background job, so a tampered source
//! URL must not be able to point it at internal services:
//! - only http:// and https:// schemes
//! - a host is required
//! - loopback, private, link-local, multicast and reserved hosts are refused
//!   unless private sources are explicitly allowed

use std::net::{Ipv4Addr, Ipv6Addr};

use url::Url;

use crate::error_handling::ConfigError;

/// Parses and checks a database source URL.
///
/// # Examples
///
/// ```
/// use geo_gate::security::validate_download_url;
///
/// assert!(validate_download_url("https://download.example.com/db.mmdb.gz", false).is_ok());
/// assert!(validate_download_url("http://192.168.1.1/db.mmdb", false).is_err());
/// assert!(validate_download_url("http://192.168.1.1/db.mmdb", true).is_ok());
/// assert!(validate_download_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_download_url(url_str: &str, allow_private: bool) -> Result<Url, ConfigError> {
    let url = Url::parse(url_str)
        .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", url_str, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ConfigError::InvalidUrl(format!(
                "unsupported scheme '{}' (only http:// and https:// allowed): {}",
                scheme, url_str
            )));
        }
    }

    let Some(host) = url.host() else {
        return Err(ConfigError::InvalidUrl(format!("no host: {}", url_str)));
    };
    if allow_private {
        return Ok(url);
    }

    let refused = match host {
        url::Host::Domain(domain) => is_localhost_domain(domain),
        url::Host::Ipv4(ip) => is_private_ipv4(ip),
        url::Host::Ipv6(ip) => is_private_ipv6(ip),
    };
    if refused {
        return Err(ConfigError::InvalidUrl(format!(
            "private or local host is not allowed: {}",
            url_str
        )));
    }
    Ok(url)
}

/// Loopback, RFC 1918, link-local, "this network", multicast and reserved ranges.
fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 127
        || a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
        || a == 0
        || a >= 224
}

/// Loopback, unique local (fc00::/7), link-local (fe80::/10) and multicast.
fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first & 0xff00) == 0xff00
}

fn is_localhost_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost" || domain == "localhost.localdomain" || domain.ends_with(".localhost")
}
