//! Candidate IP gathering.

use std::net::IpAddr;

use super::context::RequestContext;
use super::filters::FilterRegistry;
use crate::config::Settings;

/// Addresses to validate, in validation order.
///
/// Addresses from the configured proxy headers come first, in header order
/// and left to right within a header; the peer address (after the
/// `ip-source` extension point) comes last. Values that are not a legal IP
/// address are skipped, duplicates are dropped.
pub fn candidate_ips(ctx: &RequestContext, settings: &Settings, filters: &FilterRegistry) -> Vec<IpAddr> {
    let peer = filters.apply_ip_source(ctx);
    let mut candidates: Vec<IpAddr> = Vec::new();

    for header in settings.validation.proxy_headers() {
        let Some(value) = ctx.header(&header) else {
            continue;
        };
        for raw in value.split(',') {
            let Ok(ip) = raw.trim().parse::<IpAddr>() else {
                log::debug!("Ignoring invalid address '{}' in {}", raw.trim(), header);
                continue;
            };
            if ip != peer && !candidates.contains(&ip) {
                candidates.push(ip);
            }
        }
    }

    candidates.push(peer);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationToggles;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_peer_only_without_proxy_headers() {
        let ctx = RequestContext::new(ip("192.0.2.1"), "GET", "/");
        let ips = candidate_ips(&ctx, &Settings::default(), &FilterRegistry::new());
        assert_eq!(ips, vec![ip("192.0.2.1")]);
    }

    #[test]
    fn test_proxy_addresses_precede_peer() {
        let ctx = RequestContext::new(ip("192.0.2.1"), "GET", "/")
            .with_header("X-Forwarded-For", "203.0.113.7, 198.51.100.3");
        let ips = candidate_ips(&ctx, &Settings::default(), &FilterRegistry::new());
        assert_eq!(ips, vec![ip("203.0.113.7"), ip("198.51.100.3"), ip("192.0.2.1")]);
    }

    #[test]
    fn test_invalid_and_duplicate_values_are_dropped() {
        let settings = Settings {
            validation: ValidationToggles {
                proxy: vec!["x-forwarded-for".into(), "x-real-ip".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = RequestContext::new(ip("192.0.2.1"), "GET", "/")
            .with_header("x-forwarded-for", "unknown, 203.0.113.7, 192.0.2.1")
            .with_header("x-real-ip", "203.0.113.7");
        let ips = candidate_ips(&ctx, &settings, &FilterRegistry::new());
        assert_eq!(ips, vec![ip("203.0.113.7"), ip("192.0.2.1")]);
    }

    #[test]
    fn test_ip_source_filter_changes_peer() {
        let mut filters = FilterRegistry::new();
        filters.on_ip_source(|_, _| "2001:db8::5".parse().unwrap());
        let ctx = RequestContext::new(ip("127.0.0.1"), "GET", "/");
        assert_eq!(candidate_ips(&ctx, &Settings::default(), &filters), vec![ip("2001:db8::5")]);
    }
}
