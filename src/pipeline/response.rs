//! Block responses.
//!
//! The response class follows the status code: 2xx refreshes to the landing
//! page, 3xx redirects to a neutral sinkhole, anything else is a terminal
//! error page.

use std::path::Path;

use reqwest::StatusCode;

use super::context::RequestContext;
use super::filters::FilterRegistry;
use super::record::Hook;
use crate::config::{Settings, CACHE_CONTROL, CONTENT_TYPE, LOCATION, NO_CACHE, REFRESH, SINKHOLE_URL};

/// A complete response the host sends instead of serving the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl BlockResponse {
    /// Value of a response header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn new(status: u16) -> Self {
        Self {
            status,
            headers: vec![(CACHE_CONTROL.to_string(), NO_CACHE.to_string())],
            body: String::new(),
        }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// Standard reason phrase of `code`.
pub fn reason_phrase(code: u16) -> String {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Forbidden")
        .to_string()
}

/// Builds the block response of `hook` for `code`.
///
/// The per-hook status and reason extension points run first.
pub async fn build_block_response(
    hook: Hook,
    code: u16,
    settings: &Settings,
    ctx: &RequestContext,
    filters: &FilterRegistry,
) -> BlockResponse {
    let status = filters.apply_status(hook, code);
    let reason = filters.apply_reason(hook, reason_phrase(status));

    match status / 100 {
        2 => BlockResponse::new(status).with_header(REFRESH, format!("0; url={}", settings.home_url)),
        3 => BlockResponse::new(status).with_header(LOCATION, SINKHOLE_URL),
        _ => error_page(hook, status, &reason, settings, ctx).await,
    }
}

async fn error_page(
    hook: Hook,
    status: u16,
    reason: &str,
    settings: &Settings,
    ctx: &RequestContext,
) -> BlockResponse {
    let wants_xml = hook == Hook::Xmlrpc
        || ctx
            .header(CONTENT_TYPE)
            .is_some_and(|v| v.to_ascii_lowercase().contains("text/xml"));
    if wants_xml {
        let mut response = BlockResponse::new(status)
            .with_header("Content-Type", "text/xml; charset=UTF-8");
        response.body = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<response>\n<error>1</error>\n<message>{}</message>\n</response>\n",
            escape(reason)
        );
        return response;
    }

    let mut response =
        BlockResponse::new(status).with_header("Content-Type", "text/html; charset=UTF-8");
    response.body = match settings.template_dir.as_deref() {
        Some(dir) => match read_template(dir, status).await {
            Some(page) => page,
            None => default_page(status, reason),
        },
        None => default_page(status, reason),
    };
    response
}

async fn read_template(dir: &Path, status: u16) -> Option<String> {
    let path = dir.join(format!("{}.html", status));
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Some(page),
        Err(e) => {
            log::debug!("No block template at {}: {}", path.display(), e);
            None
        }
    }
}

fn default_page(status: u16, reason: &str) -> String {
    let reason = escape(reason);
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{status} {reason}</title></head>\n<body>\n<h1>{status} {reason}</h1>\n<p><a href=\"javascript:history.back()\">&laquo; Back</a></p>\n</body>\n</html>\n"
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx() -> RequestContext {
        RequestContext::new("192.0.2.1".parse().unwrap(), "POST", "/wp-comments-post.php")
    }

    async fn build(hook: Hook, code: u16, settings: &Settings) -> BlockResponse {
        build_block_response(hook, code, settings, &ctx(), &FilterRegistry::new()).await
    }

    #[tokio::test]
    async fn test_success_class_refreshes_home() {
        let settings = Settings {
            home_url: "https://example.com/".to_string(),
            ..Default::default()
        };
        let response = build(Hook::Comment, 200, &settings).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header("refresh"), Some("0; url=https://example.com/"));
        assert_eq!(response.header("cache-control"), Some(NO_CACHE));
    }

    #[tokio::test]
    async fn test_redirect_class_goes_to_sinkhole() {
        let response = build(Hook::Login, 302, &Settings::default()).await;
        assert_eq!(response.status, 302);
        assert_eq!(response.header("location"), Some(SINKHOLE_URL));
    }

    #[tokio::test]
    async fn test_error_class_renders_default_page() {
        let response = build(Hook::Comment, 403, &Settings::default()).await;
        assert_eq!(response.status, 403);
        assert!(response.body.contains("403 Forbidden"));
    }

    #[tokio::test]
    async fn test_xmlrpc_gets_xml_body() {
        let response = build(Hook::Xmlrpc, 503, &Settings::default()).await;
        assert!(response.header("content-type").unwrap().starts_with("text/xml"));
        assert!(response.body.contains("<message>Service Unavailable</message>"));
    }

    #[tokio::test]
    async fn test_template_directory_page() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::write(dir.path().join("404.html"), "<p>gone fishing</p>").unwrap();
        let settings = Settings {
            template_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(build(Hook::Admin, 404, &settings).await.body, "<p>gone fishing</p>");
        // no template for 403 falls back to the default page
        assert!(build(Hook::Admin, 403, &settings).await.body.contains("403 Forbidden"));
    }

    #[tokio::test]
    async fn test_status_override_changes_class() {
        let mut filters = FilterRegistry::new();
        filters.on_status(Hook::Comment, |_| 301);
        let response =
            build_block_response(Hook::Comment, 403, &Settings::default(), &ctx(), &filters).await;
        assert_eq!(response.status, 301);
        assert_eq!(response.header("location"), Some(SINKHOLE_URL));
    }
}
