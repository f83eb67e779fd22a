use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::config::{ProviderSettings, ValidationToggles};
use crate::error_handling::ProviderError;
use crate::geoip::{GeoProvider, ProviderRegistry, RequestOptions};
use crate::pipeline::FilterRegistry;
use crate::storage::MemoryStore;

/// Answers the same country for every address.
struct FixedProvider(&'static str);

#[async_trait]
impl GeoProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn country(
        &self,
        _ip: IpAddr,
        _options: &RequestOptions,
    ) -> Result<Option<String>, ProviderError> {
        Ok(Some(self.0.to_string()))
    }
}

const SECRET: &[u8] = b"guard-test-secret";

fn guard_with(country: &'static str, filters: FilterRegistry) -> AntiBypassGuard {
    let mut registry = ProviderRegistry::new();
    registry.register_instance(Arc::new(FixedProvider(country)));
    let service = ValidationService::new(Arc::new(MemoryStore::new()), registry, filters);
    let nonces = HmacNonceAuthority::new(SECRET).unwrap();
    AntiBypassGuard::new(Arc::new(service), Arc::new(nonces))
}

fn guard(country: &'static str) -> AntiBypassGuard {
    guard_with(country, FilterRegistry::new())
}

fn settings(validation: ValidationToggles) -> Settings {
    Settings {
        allow_list: vec!["JP".to_string()],
        providers: vec![ProviderSettings::enabled("fixed")],
        validation,
        ..Default::default()
    }
}

fn nonce_protected() -> Settings {
    settings(ValidationToggles {
        admin: SurfaceProtection::CountryAndNonce,
        ajax: SurfaceProtection::CountryAndNonce,
        plugins: SurfaceProtection::CountryAndNonce,
        ..Default::default()
    })
}

fn peer() -> IpAddr {
    "192.0.2.10".parse().unwrap()
}

fn alice() -> Principal {
    Principal::new("7", "alice-session")
}

fn nonce_for(principal: &Principal) -> String {
    HmacNonceAuthority::new(SECRET)
        .unwrap()
        .issue(principal, NONCE_ACTION)
}

fn admin_page(query: &str) -> RequestContext {
    RequestContext::from_uri(peer(), "GET", &format!("/wp-admin/admin.php?{}", query))
        .with_principal(alice())
}

#[tokio::test]
async fn test_admin_page_with_valid_nonce_passes() {
    let guard = guard("JP");
    let ctx = admin_page("page=my-plugin").with_query(NONCE_PARAM, nonce_for(&alice()));

    let verdict = guard.validate_admin(&nonce_protected(), &ctx).await;
    assert_eq!(verdict.result(), Some(ValidationResult::Passed));
}

#[tokio::test]
async fn test_admin_page_without_nonce_is_blocked() {
    let guard = guard("JP");
    let verdict = guard
        .validate_admin(&nonce_protected(), &admin_page("page=my-plugin"))
        .await;
    assert!(verdict.is_blocked());
}

#[tokio::test]
async fn test_nonce_of_other_principal_is_blocked() {
    let guard = guard("JP");
    let mallory = Principal::new("8", "mallory-session");
    let ctx = admin_page("page=my-plugin").with_query(NONCE_PARAM, nonce_for(&mallory));

    assert!(guard.validate_admin(&nonce_protected(), &ctx).await.is_blocked());
}

#[tokio::test]
async fn test_admin_without_page_or_action_skips_nonce() {
    let guard = guard("JP");
    let ctx = RequestContext::new(peer(), "GET", "/wp-admin/").with_principal(alice());
    let verdict = guard.validate_admin(&nonce_protected(), &ctx).await;
    assert_eq!(verdict.result(), Some(ValidationResult::Passed));
}

#[tokio::test]
async fn test_bypass_admin_action_needs_no_nonce() {
    let guard = guard("JP");
    let ctx = RequestContext::new(peer(), "POST", "/wp-admin/admin-ajax.php")
        .with_form("action", "upload-attachment")
        .with_principal(alice());
    let verdict = guard.validate_admin(&nonce_protected(), &ctx).await;
    assert_eq!(verdict.result(), Some(ValidationResult::Passed));
}

#[tokio::test]
async fn test_public_ajax_action_needs_no_nonce() {
    let mut filters = FilterRegistry::new();
    filters.on_list(ListExtension::AdminActions, |mut list| {
        list.push("heartbeat".to_string());
        list
    });
    let guard = guard_with("JP", filters);
    let settings = nonce_protected();

    let public = RequestContext::new(peer(), "POST", "/wp-admin/admin-ajax.php")
        .with_form("action", "heartbeat");
    assert!(!guard.validate_admin(&settings, &public).await.is_blocked());

    let private = RequestContext::new(peer(), "POST", "/wp-admin/admin-ajax.php")
        .with_form("action", "delete-post");
    assert!(guard.validate_admin(&settings, &private).await.is_blocked());
}

#[tokio::test]
async fn test_nonce_in_referer_redirects_get() {
    let guard = guard("JP");
    let nonce = nonce_for(&alice());
    let ctx = admin_page("page=my-plugin").with_header(
        "Referer",
        format!("https://example.com/wp-admin/?{}={}", NONCE_PARAM, nonce),
    );

    match guard.validate_admin(&nonce_protected(), &ctx).await {
        Verdict::Redirect { location } => {
            assert!(location.starts_with("/wp-admin/admin.php?"));
            assert!(location.contains(&format!("{}={}", NONCE_PARAM, nonce)));
        }
        other => panic!("expected redirect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nonce_in_referer_verifies_post() {
    let guard = guard("JP");
    let nonce = nonce_for(&alice());
    let ctx = RequestContext::new(peer(), "POST", "/wp-admin/admin-post.php")
        .with_form("action", "save-options")
        .with_header(
            "Referer",
            format!("https://example.com/wp-admin/?{}={}", NONCE_PARAM, nonce),
        )
        .with_principal(alice());
    let verdict = guard.validate_admin(&nonce_protected(), &ctx).await;
    assert_eq!(verdict.result(), Some(ValidationResult::Passed));
}

#[tokio::test]
async fn test_admin_disabled_is_skipped() {
    let guard = guard("US");
    let settings = settings(ValidationToggles {
        admin: SurfaceProtection::Disabled,
        ..Default::default()
    });
    assert_eq!(
        guard.validate_admin(&settings, &admin_page("page=x")).await,
        Verdict::Skipped
    );
}

#[tokio::test]
async fn test_country_only_admin_blocks_by_country() {
    let guard = guard("US");
    let settings = settings(ValidationToggles::default());
    assert!(guard
        .validate_admin(&settings, &admin_page("page=x"))
        .await
        .is_blocked());
}

#[tokio::test]
async fn test_login_trusted_mode_exempts_login_form() {
    let guard = guard("US");
    let settings = settings(ValidationToggles {
        login: LoginProtection::TrustAuthenticated,
        ..Default::default()
    });

    let login = RequestContext::new(peer(), "POST", "/wp-login.php").with_query("action", "login");
    assert_eq!(guard.validate_login(&settings, &login).await, Verdict::Skipped);
    let bare = RequestContext::new(peer(), "POST", "/wp-login.php");
    assert_eq!(guard.validate_login(&settings, &bare).await, Verdict::Skipped);

    let register =
        RequestContext::new(peer(), "POST", "/wp-login.php").with_query("action", "register");
    assert!(guard.validate_login(&settings, &register).await.is_blocked());
}

#[tokio::test]
async fn test_failures_reach_threshold_then_login_blocked() {
    let guard = guard("JP");
    let settings = Settings {
        login_fails: 3,
        ..settings(ValidationToggles::default())
    };
    let ctx = RequestContext::new(peer(), "POST", "/wp-login.php");

    assert!(!guard.validate_login(&settings, &ctx).await.is_blocked());
    for expected in 1..=3 {
        assert_eq!(guard.auth_fail(&settings, &ctx).await, expected);
    }

    let verdict = guard.validate_login(&settings, &ctx).await;
    assert!(verdict.is_blocked());
    assert_eq!(verdict.record().unwrap().country_code, "JP");
}

#[tokio::test]
async fn test_auth_fail_without_cache_entry_creates_counter() {
    let guard = guard("JP");
    let settings = settings(ValidationToggles::default());
    let ctx = RequestContext::new(peer(), "POST", "/xmlrpc.php");

    assert_eq!(guard.auth_fail(&settings, &ctx).await, 1);
    let entry = guard.service().cache().get(peer()).await.unwrap().unwrap();
    assert_eq!(entry.fail, 1);
    assert_eq!(entry.hook, Hook::Login);
    assert_eq!(entry.country_code, "ZZ");

    let logs = guard.service().logs().recent(Some(Hook::Login), 10).await.unwrap();
    assert_eq!(logs[0].record.result(), Some(ValidationResult::Failed));
}

#[tokio::test]
async fn test_logout_redirect() {
    let guard = guard("JP");
    let logout = RequestContext::new(peer(), "GET", "/wp-login.php").with_query("action", "logout");
    assert_eq!(guard.logout_redirect(&logout, "/wp-admin/"), "wp-login.php?loggedout=true");
    let other = RequestContext::new(peer(), "GET", "/wp-login.php");
    assert_eq!(guard.logout_redirect(&other, "/wp-admin/"), "/wp-admin/");
}

#[tokio::test]
async fn test_comment_and_xmlrpc_toggles() {
    let guard = guard("US");
    let settings = settings(ValidationToggles {
        comment: false,
        ..Default::default()
    });
    let ctx = RequestContext::new(peer(), "POST", "/wp-comments-post.php");
    assert_eq!(guard.validate_comment(&settings, &ctx).await, Verdict::Skipped);
    assert!(guard.validate_xmlrpc(&settings, &ctx).await.is_blocked());
}

#[tokio::test]
async fn test_attach_nonce_only_for_principals() {
    let guard = guard("JP");
    let settings = nonce_protected();
    let markup = r#"<a href="/wp-admin/edit.php">edit</a>"#;

    let anonymous = RequestContext::new(peer(), "GET", "/wp-admin/").with_header("Host", "example.com");
    assert_eq!(guard.attach_nonce(&settings, &anonymous, markup), markup);

    let ctx = anonymous.with_principal(alice());
    let out = guard.attach_nonce(&settings, &ctx, markup);
    assert!(out.contains(&format!("{}={}", NONCE_PARAM, nonce_for(&alice()))));
}

fn document_root() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let plugin = dir.path().join("wp-content/plugins/foo");
    std::fs::create_dir_all(&plugin).unwrap();
    std::fs::write(plugin.join("ajax.php"), "<?php").unwrap();
    std::fs::write(plugin.join("notes.txt"), "notes").unwrap();
    dir
}

#[tokio::test]
async fn test_direct_null_byte_is_malicious() {
    let guard = guard("JP");
    let root = document_root();
    let ctx = RequestContext::new(
        peer(),
        "GET",
        "/wp-content/plugins/foo/../../../etc/passwd\0.php",
    );

    let access = guard.validate_direct(&nonce_protected(), &ctx, root.path()).await;
    assert!(access.file.is_none());
    assert_eq!(access.verdict.response().unwrap().status, 403);
}

#[tokio::test]
async fn test_direct_missing_file_answers_not_found() {
    let guard = guard("JP");
    let root = document_root();
    let ctx = RequestContext::new(peer(), "GET", "/wp-content/plugins/foo/missing.php");

    let access = guard.validate_direct(&nonce_protected(), &ctx, root.path()).await;
    assert!(access.file.is_none());
    assert_eq!(access.verdict.response().unwrap().status, 404);
}

#[tokio::test]
async fn test_direct_existing_non_script_answers_response_code() {
    let guard = guard("JP");
    let root = document_root();
    let ctx = RequestContext::new(peer(), "GET", "/wp-content/plugins/foo/notes.txt");

    let access = guard.validate_direct(&nonce_protected(), &ctx, root.path()).await;
    assert_eq!(access.verdict.response().unwrap().status, 403);
}

#[tokio::test]
async fn test_direct_script_with_nonce_is_served() {
    let guard = guard("JP");
    let root = document_root();
    let ctx = RequestContext::new(peer(), "GET", "/wp-content/plugins/foo/ajax.php")
        .with_query(NONCE_PARAM, nonce_for(&alice()))
        .with_principal(alice());

    let access = guard.validate_direct(&nonce_protected(), &ctx, root.path()).await;
    assert!(!access.verdict.is_blocked());
    assert!(access.file.unwrap().ends_with("plugins/foo/ajax.php"));
}

#[tokio::test]
async fn test_direct_script_without_nonce_is_blocked_unless_bypassed() {
    let root = document_root();
    let ctx = RequestContext::new(peer(), "GET", "/wp-content/plugins/foo/ajax.php");

    let access = guard("JP")
        .validate_direct(&nonce_protected(), &ctx, root.path())
        .await;
    assert!(access.verdict.is_blocked());
    assert!(access.file.is_none());

    let mut filters = FilterRegistry::new();
    filters.on_list(ListExtension::BypassPlugins, |mut list| {
        list.push("foo".to_string());
        list
    });
    let access = guard_with("JP", filters)
        .validate_direct(&nonce_protected(), &ctx, root.path())
        .await;
    assert!(access.file.is_some());
}

#[tokio::test]
async fn test_direct_validation_disabled_serves_file() {
    let root = document_root();
    let ctx = RequestContext::new(peer(), "GET", "/wp-content/plugins/foo/ajax.php");
    let settings = settings(ValidationToggles::default());

    let access = guard("US").validate_direct(&settings, &ctx, root.path()).await;
    assert_eq!(access.verdict, Verdict::Skipped);
    assert!(access.file.is_some());
}

#[test]
fn test_direct_target_and_endpoint_classification() {
    let settings = Settings::default();
    let root = Path::new("/srv/site");
    let of = |file: &str| DirectTarget::of(&root.join(file), root, &settings);
    assert_eq!(
        of("wp-content/plugins/foo/a.php"),
        Some(DirectTarget::Plugin("foo".to_string()))
    );
    assert_eq!(
        of("wp-content/themes/bar/x/y.php"),
        Some(DirectTarget::Theme("bar".to_string()))
    );
    assert_eq!(of("wp-content/plugins/hello.php"), None);
    // nested copies of the content directory do not count
    assert_eq!(of("uploads/wp-content/plugins/foo/a.php"), None);
    assert_eq!(
        DirectTarget::of(Path::new("/elsewhere/wp-content/plugins/foo/a.php"), root, &settings),
        None
    );

    assert_eq!(AdminEndpoint::classify("/wp-admin/admin-ajax.php"), AdminEndpoint::Ajax);
    assert_eq!(AdminEndpoint::classify("/wp-admin/admin-post.php"), AdminEndpoint::Post);
    assert_eq!(AdminEndpoint::classify("/wp-admin/options.php"), AdminEndpoint::Page);
}

#[tokio::test]
async fn test_direct_path_spelling_does_not_escape_protection() {
    let root = document_root();
    let settings = settings(ValidationToggles {
        plugins: SurfaceProtection::Country,
        ..Default::default()
    });

    for path in [
        "/wp-content//plugins/foo/ajax.php",
        "/wp-content/./plugins/foo/ajax.php",
        "/wp-content\\plugins\\foo\\ajax.php",
        "//wp-content/plugins/./foo//ajax.php",
    ] {
        let ctx = RequestContext::new(peer(), "GET", path);
        let access = guard("US").validate_direct(&settings, &ctx, root.path()).await;
        assert!(access.verdict.is_blocked(), "{path} was not validated");
        assert!(access.file.is_none(), "{path} was served");
    }
}

#[tokio::test]
async fn test_direct_bypass_applies_to_resolved_plugin_only() {
    let root = document_root();
    let victim = root.path().join("wp-content/plugins/victim");
    std::fs::create_dir_all(&victim).unwrap();
    std::fs::write(victim.join("x.php"), "<?php").unwrap();

    let mut filters = FilterRegistry::new();
    filters.on_list(ListExtension::BypassPlugins, |mut list| {
        list.push("foo".to_string());
        list
    });
    let guard = guard_with("JP", filters);

    let ctx = RequestContext::new(peer(), "GET", "/wp-content/plugins/foo/../victim/x.php");
    let access = guard.validate_direct(&nonce_protected(), &ctx, root.path()).await;
    assert!(access.verdict.is_blocked(), "nonce check skipped for victim");
    assert!(access.file.is_none());

    let ctx = RequestContext::new(peer(), "GET", "/wp-content/plugins/victim/../foo/ajax.php");
    let access = guard.validate_direct(&nonce_protected(), &ctx, root.path()).await;
    assert!(access.file.unwrap().ends_with("plugins/foo/ajax.php"));
}
