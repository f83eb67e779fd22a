//! Anti-bypass guard.
//!
//! Entry points for the hooks, plus the two defences against requests that
//! try to skip the normal validation points: authenticity nonces on the
//! administrative surface and inspection of direct file requests.

mod direct;
mod nonce;

#[cfg(test)]
mod tests;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::config::{
    LoginProtection, Settings, SurfaceProtection, ADMIN_AJAX_ENDPOINT, ADMIN_POST_ENDPOINT,
    DEFAULT_BYPASS_ADMINS, HTTP_STATUS_NOT_FOUND, LOGIN_FORM_ACTIONS, LOGOUT_REDIRECT,
    NONCE_ACTION, NONCE_PARAM, UNKNOWN_COUNTRY,
};
use crate::error_handling::{AuthenticityError, TraversalError};
use crate::pipeline::{
    Hook, ListExtension, Principal, RequestContext, ValidateOptions, ValidationRecord,
    ValidationResult, ValidationService, Verdict,
};

pub use direct::{inspect_direct_path, normalize_request_path, rejected_path_exists};
pub use nonce::{
    attach_nonce, retrieve_nonce, with_nonce_param, HmacNonceAuthority, NonceAuthority,
};

/// Kind of administrative endpoint a request hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminEndpoint {
    /// Asynchronous action endpoint
    Ajax,
    /// Form post endpoint
    Post,
    /// Any other admin page
    Page,
}

impl AdminEndpoint {
    pub fn classify(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or_default();
        if file == ADMIN_AJAX_ENDPOINT {
            AdminEndpoint::Ajax
        } else if file == ADMIN_POST_ENDPOINT {
            AdminEndpoint::Post
        } else {
            AdminEndpoint::Page
        }
    }
}

/// Which content directory a direct request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectTarget {
    Plugin(String),
    Theme(String),
}

impl DirectTarget {
    /// Finds the plugin/theme directory owning `file`.
    ///
    /// `file` and `root` must both be canonical; the content directories of
    /// `settings` are matched segment by segment against `file` relative to
    /// `root`.
    pub fn of(file: &Path, root: &Path, settings: &Settings) -> Option<Self> {
        let relative = file.strip_prefix(root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Option<_>>()?;

        let owner = |dir: &str| -> Option<String> {
            let prefix: Vec<&str> = dir
                .split(['/', '\\'])
                .filter(|s| !s.is_empty() && *s != ".")
                .collect();
            if prefix.is_empty() {
                return None;
            }
            match parts.strip_prefix(prefix.as_slice())? {
                // a bare file directly in the content directory has no owner
                [name, _, ..] => Some(name.to_string()),
                _ => None,
            }
        };
        let dirs = &settings.content_dirs;
        owner(&dirs.plugins)
            .map(DirectTarget::Plugin)
            .or_else(|| owner(&dirs.themes).map(DirectTarget::Theme))
    }

    fn protection(&self, settings: &Settings) -> SurfaceProtection {
        match self {
            DirectTarget::Plugin(_) => settings.validation.plugins,
            DirectTarget::Theme(_) => settings.validation.themes,
        }
    }

    fn bypass_list(&self) -> ListExtension {
        match self {
            DirectTarget::Plugin(_) => ListExtension::BypassPlugins,
            DirectTarget::Theme(_) => ListExtension::BypassThemes,
        }
    }

    fn name(&self) -> &str {
        match self {
            DirectTarget::Plugin(name) | DirectTarget::Theme(name) => name,
        }
    }
}

/// Outcome of a direct file request.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectAccess {
    pub verdict: Verdict,
    /// Canonical script to execute; `None` unless the request may proceed
    pub file: Option<PathBuf>,
}

/// Hook entry points with the anti-bypass defences.
pub struct AntiBypassGuard {
    service: Arc<ValidationService>,
    nonces: Arc<dyn NonceAuthority>,
}

impl AntiBypassGuard {
    pub fn new(service: Arc<ValidationService>, nonces: Arc<dyn NonceAuthority>) -> Self {
        Self { service, nonces }
    }

    pub fn service(&self) -> &ValidationService {
        &self.service
    }

    /// The nonce of the request's principal, if one is logged in.
    pub fn issue_nonce(&self, ctx: &RequestContext) -> Option<String> {
        ctx.principal
            .as_ref()
            .map(|principal| self.nonces.issue(principal, NONCE_ACTION))
    }

    /// Adds the principal's nonce to admin-surface links and forms in `markup`.
    ///
    /// Markup rendered for anonymous requests is returned unchanged.
    pub fn attach_nonce(&self, settings: &Settings, ctx: &RequestContext, markup: &str) -> String {
        let Some(nonce) = self.issue_nonce(ctx) else {
            return markup.to_string();
        };
        let host = ctx.header("host").unwrap_or("localhost");
        let page = match Url::parse(&format!("http://{}{}", host, ctx.uri())) {
            Ok(page) => page,
            Err(e) => {
                log::debug!("Cannot resolve page URL for nonce attachment: {}", e);
                return markup.to_string();
            }
        };
        let dirs = &settings.content_dirs;
        attach_nonce(
            markup,
            &nonce,
            &page,
            &[&dirs.admin, &dirs.plugins, &dirs.themes],
        )
    }

    fn check_nonce(&self, ctx: &RequestContext) -> Result<(), AuthenticityError> {
        let token = retrieve_nonce(ctx).ok_or(AuthenticityError::Missing)?;
        let anonymous = Principal::new("0", "");
        let principal = ctx.principal.as_ref().unwrap_or(&anonymous);
        self.nonces.verify(&token, principal, NONCE_ACTION)
    }

    /// Redirect that re-attaches a nonce only present in the referring URL.
    fn trace_nonce(&self, ctx: &RequestContext) -> Option<String> {
        if ctx.param(NONCE_PARAM).is_some() || !ctx.is_get() || !ctx.is_authenticated() {
            return None;
        }
        retrieve_nonce(ctx).map(|nonce| with_nonce_param(&ctx.uri(), &nonce))
    }

    pub async fn validate_comment(&self, settings: &Settings, ctx: &RequestContext) -> Verdict {
        if !settings.validation.comment {
            return Verdict::Skipped;
        }
        self.service.validate(Hook::Comment, settings, ctx, true).await
    }

    pub async fn validate_xmlrpc(&self, settings: &Settings, ctx: &RequestContext) -> Verdict {
        if !settings.validation.xmlrpc {
            return Verdict::Skipped;
        }
        self.service.validate(Hook::Xmlrpc, settings, ctx, true).await
    }

    /// Login and registration.
    ///
    /// With trusted authentication only form actions other than login and
    /// logout are validated.
    pub async fn validate_login(&self, settings: &Settings, ctx: &RequestContext) -> Verdict {
        match settings.validation.login {
            LoginProtection::Disabled => return Verdict::Skipped,
            LoginProtection::Enabled => {}
            LoginProtection::TrustAuthenticated => match ctx.param("action") {
                Some(action) if !LOGIN_FORM_ACTIONS.contains(&action) => {}
                _ => return Verdict::Skipped,
            },
        }
        self.service.validate(Hook::Login, settings, ctx, true).await
    }

    /// Administrative pages and the ajax/post endpoints.
    pub async fn validate_admin(&self, settings: &Settings, ctx: &RequestContext) -> Verdict {
        let endpoint = AdminEndpoint::classify(&ctx.path);
        let protection = match endpoint {
            AdminEndpoint::Ajax | AdminEndpoint::Post => settings.validation.ajax,
            AdminEndpoint::Page => settings.validation.admin,
        };
        if !protection.is_enabled() {
            return Verdict::Skipped;
        }

        let action = ctx.param("action");
        let page = ctx.param("page");
        let nonce_applies = match endpoint {
            AdminEndpoint::Ajax | AdminEndpoint::Post => {
                let public = self
                    .service
                    .filters()
                    .apply_list(ListExtension::AdminActions, Vec::new());
                !action.is_some_and(|a| public.iter().any(|p| p == a))
            }
            AdminEndpoint::Page => page.is_some() || action.is_some(),
        };

        let mut options = ValidateOptions::enforcing();
        if nonce_applies && protection.requires_nonce() {
            if let Some(location) = self.trace_nonce(ctx) {
                return Verdict::Redirect { location };
            }

            let defaults = DEFAULT_BYPASS_ADMINS.iter().map(|s| s.to_string()).collect();
            let bypass = self
                .service
                .filters()
                .apply_list(ListExtension::BypassAdmins, defaults);
            let bypassed = |value: Option<&str>| value.is_some_and(|v| bypass.iter().any(|b| b == v));
            if !bypassed(action) && !bypassed(page) {
                options.authenticity = Some(self.check_nonce(ctx));
            }
        }

        self.service
            .validate_with(Hook::Admin, settings, ctx, options)
            .await
    }

    /// Direct requests to scripts under the plugin/theme directories.
    ///
    /// `root` is the document root the request path is relative to. A path
    /// that fails inspection is blocked as malicious regardless of country.
    pub async fn validate_direct(
        &self,
        settings: &Settings,
        ctx: &RequestContext,
        root: &Path,
    ) -> DirectAccess {
        let file = match inspect_direct_path(root, &ctx.path).await {
            Ok(file) => file,
            Err(e) => return self.reject_direct(settings, ctx, root, e).await,
        };

        // classify what will actually run, never the raw request path
        let canonical_root = match tokio::fs::canonicalize(root).await {
            Ok(canonical) => canonical,
            Err(e) => {
                log::warn!("Cannot canonicalize document root {}: {}", root.display(), e);
                return self
                    .reject_direct(settings, ctx, root, TraversalError::NotFound)
                    .await;
            }
        };
        let target = DirectTarget::of(&file, &canonical_root, settings);
        let protection = target
            .as_ref()
            .map(|t| t.protection(settings))
            .unwrap_or(SurfaceProtection::Disabled);

        if !protection.is_enabled() {
            return DirectAccess {
                verdict: Verdict::Skipped,
                file: Some(file),
            };
        }

        let mut options = ValidateOptions::enforcing();
        if let Some(target) = target.as_ref().filter(|_| protection.requires_nonce()) {
            let bypass = self
                .service
                .filters()
                .apply_list(target.bypass_list(), Vec::new());
            if !bypass.iter().any(|name| name == target.name()) {
                options.authenticity = Some(self.check_nonce(ctx));
            }
        }

        let verdict = self
            .service
            .validate_with(Hook::Direct, settings, ctx, options)
            .await;
        let file = (!verdict.is_blocked()).then_some(file);
        DirectAccess { verdict, file }
    }

    async fn reject_direct(
        &self,
        settings: &Settings,
        ctx: &RequestContext,
        root: &Path,
        error: TraversalError,
    ) -> DirectAccess {
        log::warn!(
            "Malicious direct request from {} for {:?}: {}",
            ctx.peer_addr,
            ctx.path,
            error
        );
        let response_code = match error {
            TraversalError::NullByte | TraversalError::EscapesRoot => settings.response_code,
            TraversalError::BadExtension | TraversalError::NotFound => {
                if rejected_path_exists(root, &ctx.path, error).await {
                    settings.response_code
                } else {
                    HTTP_STATUS_NOT_FOUND
                }
            }
        };
        let options = ValidateOptions {
            forced: Some(ValidationResult::Blocked),
            response_code: Some(response_code),
            ..ValidateOptions::enforcing()
        };
        let verdict = self
            .service
            .validate_with(Hook::Direct, settings, ctx, options)
            .await;
        DirectAccess {
            verdict,
            file: None,
        }
    }

    /// Counts a failed authentication from the request's address.
    ///
    /// The counter is created when missing. The failure is cached and
    /// recorded under the hook the address was last validated on. Returns
    /// the new failure count.
    pub async fn auth_fail(&self, settings: &Settings, ctx: &RequestContext) -> u32 {
        let service = &self.service;
        let ip = service.filters().apply_ip_source(ctx);

        let count = match service.cache().record_failure(ip, settings.cache_ttl()).await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Failed to count authentication failure of {}: {}", ip, e);
                return 0;
            }
        };

        let cached = match service.cache().get(ip).await {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Failed to read validation cache for {}: {}", ip, e);
                None
            }
        };
        let (country_code, hook) = match cached {
            Some(entry) => (entry.country_code, entry.hook),
            None => (UNKNOWN_COUNTRY.to_string(), Hook::Login),
        };

        let mut record = ValidationRecord::unresolved(ip).with_result(ValidationResult::Failed);
        record.country_code = country_code;
        record.authenticated = ctx.is_authenticated();

        log::info!("Authentication failure #{} from {} on {}", count, ip, hook);
        if let Err(e) = service.cache().update(&record, hook, settings.cache_ttl()).await {
            log::warn!("Failed to update validation cache for {}: {}", ip, e);
        }
        service.record_outcome(hook, &record, settings, ctx).await;
        count
    }

    /// Rewrites the redirect after logout so the nonce check does not block it.
    pub fn logout_redirect(&self, ctx: &RequestContext, location: &str) -> String {
        if ctx.param("action") == Some("logout") {
            LOGOUT_REDIRECT.to_string()
        } else {
            location.to_string()
        }
    }
}
