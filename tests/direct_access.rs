//! Direct requests to plugin and theme scripts through the public guard API.

mod helpers;

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use geo_gate::config::{SurfaceProtection, ValidationToggles, NONCE_PARAM};
use geo_gate::{
    AntiBypassGuard, DirectAccess, FilterRegistry, GeoProvider, MemoryStore, Principal,
    RequestContext, Settings, ValidationResult, Verdict,
};

use helpers::{allow_settings, guard, service, StubProvider};

const JAPAN: &str = "192.0.2.20";
const RUSSIA: &str = "198.51.100.20";

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn site() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let plugin = dir.path().join("wp-content/plugins/gallery");
    std::fs::create_dir_all(plugin.join("admin")).unwrap();
    std::fs::write(plugin.join("upload.php"), "<?php").unwrap();
    std::fs::write(plugin.join("admin/index.php"), "<?php").unwrap();
    std::fs::write(plugin.join("readme.txt"), "docs").unwrap();
    let theme = dir.path().join("wp-content/themes/plain");
    std::fs::create_dir_all(&theme).unwrap();
    std::fs::write(theme.join("functions.php"), "<?php").unwrap();
    std::fs::write(dir.path().join("wp-config.php"), "<?php").unwrap();
    dir
}

fn setup() -> AntiBypassGuard {
    let providers: Vec<Arc<dyn GeoProvider>> = vec![StubProvider::new(
        "table",
        &[(JAPAN, "JP"), (RUSSIA, "RU")],
    )];
    guard(service(
        Arc::new(MemoryStore::new()),
        providers,
        FilterRegistry::new(),
    ))
}

fn settings(plugins: SurfaceProtection, themes: SurfaceProtection) -> Settings {
    Settings {
        validation: ValidationToggles {
            plugins,
            themes,
            ..Default::default()
        },
        ..allow_settings(&["JP"], &["table"])
    }
}

async fn request(
    guard: &AntiBypassGuard,
    settings: &Settings,
    peer: &str,
    uri: &str,
    root: &Path,
) -> DirectAccess {
    let ctx = RequestContext::from_uri(ip(peer), "GET", uri);
    guard.validate_direct(settings, &ctx, root).await
}

#[tokio::test]
async fn test_country_only_plugin_request() {
    let site = site();
    let guard = setup();
    let settings = settings(SurfaceProtection::Country, SurfaceProtection::Disabled);

    let served = request(
        &guard,
        &settings,
        JAPAN,
        "/wp-content/plugins/gallery/upload.php",
        site.path(),
    )
    .await;
    assert_eq!(served.verdict.result(), Some(ValidationResult::Passed));
    assert!(served.file.unwrap().ends_with("gallery/upload.php"));

    let refused = request(
        &guard,
        &settings,
        RUSSIA,
        "/wp-content/plugins/gallery/upload.php",
        site.path(),
    )
    .await;
    assert!(refused.verdict.is_blocked());
    assert_eq!(refused.verdict.response().unwrap().status, 403);
    assert!(refused.file.is_none());
}

#[tokio::test]
async fn test_traversal_out_of_plugin_dir_is_blocked_for_everyone() {
    let site = site();
    let guard = setup();
    let settings = settings(SurfaceProtection::Country, SurfaceProtection::Country);

    let access = request(
        &guard,
        &settings,
        JAPAN,
        "/wp-content/plugins/gallery/../../../../wp-config.php/../../../../etc/passwd",
        site.path(),
    )
    .await;
    assert!(access.verdict.is_blocked());
    assert!(access.file.is_none());
}

#[tokio::test]
async fn test_directory_request_resolves_index() {
    let site = site();
    let guard = setup();
    let settings = settings(SurfaceProtection::Country, SurfaceProtection::Disabled);

    let access = request(
        &guard,
        &settings,
        JAPAN,
        "/wp-content/plugins/gallery/admin/",
        site.path(),
    )
    .await;
    assert_eq!(access.verdict.result(), Some(ValidationResult::Passed));
    assert!(access.file.unwrap().ends_with("admin/index.php"));
}

#[tokio::test]
async fn test_theme_nonce_round_trip() {
    let site = site();
    let guard = setup();
    let settings = settings(SurfaceProtection::Disabled, SurfaceProtection::CountryAndNonce);
    let principal = Principal::new("3", "editor-session");

    let unsigned =
        RequestContext::from_uri(ip(JAPAN), "GET", "/wp-content/themes/plain/functions.php")
            .with_principal(principal);
    let access = guard.validate_direct(&settings, &unsigned, site.path()).await;
    assert!(access.verdict.is_blocked(), "missing nonce");

    let nonce = guard.issue_nonce(&unsigned).unwrap();
    let signed = unsigned.with_query(NONCE_PARAM, nonce);
    let access = guard.validate_direct(&settings, &signed, site.path()).await;
    assert_eq!(access.verdict.result(), Some(ValidationResult::Passed));
    assert!(access.file.is_some());
}

#[tokio::test]
async fn test_unprotected_directory_is_skipped() {
    let site = site();
    let guard = setup();
    let settings = settings(SurfaceProtection::Country, SurfaceProtection::Disabled);

    let access = request(
        &guard,
        &settings,
        RUSSIA,
        "/wp-content/themes/plain/functions.php",
        site.path(),
    )
    .await;
    assert_eq!(access.verdict, Verdict::Skipped);
    assert!(access.file.is_some());
}

#[tokio::test]
async fn test_success_status_redirects_home() {
    let site = site();
    let guard = setup();
    let settings = Settings {
        response_code: 200,
        home_url: "https://example.com/".to_string(),
        ..settings(SurfaceProtection::Country, SurfaceProtection::Disabled)
    };

    let access = request(
        &guard,
        &settings,
        RUSSIA,
        "/wp-content/plugins/gallery/upload.php",
        site.path(),
    )
    .await;
    let response = access.verdict.response().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.header("Refresh").unwrap().contains("https://example.com/"));
}
