//! Authenticity tokens for the administrative surface.
//!
//! A nonce is an HMAC over the principal, its session, the purpose and a time
//! tick. A tick covers half the lifetime and the previous tick is accepted as
//! well, so a token stays valid between one half and one full lifetime.

use std::sync::LazyLock;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use regex::Regex;
use sha2::Sha256;
use url::Url;

use crate::config::{FORM_REFERER_FIELD, NONCE_LIFETIME, NONCE_PARAM, NONCE_SECRET_ENV, REFERER};
use crate::error_handling::{AuthenticityError, ConfigError};
use crate::pipeline::{Principal, RequestContext};

/// Signature bytes kept in a token.
const TOKEN_BYTES: usize = 12;

/// Issues and verifies nonces for a principal and purpose.
pub trait NonceAuthority: Send + Sync {
    fn issue(&self, principal: &Principal, action: &str) -> String;

    fn verify(&self, token: &str, principal: &Principal, action: &str)
        -> Result<(), AuthenticityError>;
}

/// HMAC-SHA256 nonces with a two-tick validity window.
#[derive(Clone)]
pub struct HmacNonceAuthority {
    mac: Hmac<Sha256>,
    lifetime: Duration,
}

impl HmacNonceAuthority {
    pub fn new(secret: &[u8]) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::InvalidSettings {
                field: "nonce_secret".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        let mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|e| {
            ConfigError::InvalidSettings {
                field: "nonce_secret".to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            mac,
            lifetime: NONCE_LIFETIME,
        })
    }

    /// Reads the secret from the environment.
    ///
    /// Without one, a random secret is generated; nonces then do not survive
    /// a restart.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(NONCE_SECRET_ENV) {
            Ok(secret) if !secret.trim().is_empty() => Self::new(secret.trim().as_bytes()),
            _ => {
                log::warn!(
                    "{} is not set; using a random nonce secret for this process",
                    NONCE_SECRET_ENV
                );
                let mut secret = [0u8; 32];
                rand::rng().fill_bytes(&mut secret);
                Self::new(&secret)
            }
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    fn tick(&self, now: DateTime<Utc>) -> i64 {
        let half = (self.lifetime.as_secs() / 2).max(1) as i64;
        now.timestamp().div_euclid(half) + 1
    }

    fn sign(&self, tick: i64, principal: &Principal, action: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(format!("{}|{}|{}|{}", tick, action, principal.id, principal.session).as_bytes());
        let mut signature = mac.finalize().into_bytes().to_vec();
        signature.truncate(TOKEN_BYTES);
        signature
    }

    pub fn issue_at(&self, principal: &Principal, action: &str, now: DateTime<Utc>) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(self.sign(self.tick(now), principal, action))
    }

    pub fn verify_at(
        &self,
        token: &str,
        principal: &Principal,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthenticityError> {
        if token.is_empty() {
            return Err(AuthenticityError::Missing);
        }
        let presented = general_purpose::URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| AuthenticityError::Invalid)?;
        if presented.len() != TOKEN_BYTES {
            return Err(AuthenticityError::Invalid);
        }

        let tick = self.tick(now);
        for candidate in [tick, tick - 1] {
            let mut mac = self.mac.clone();
            mac.update(
                format!("{}|{}|{}|{}", candidate, action, principal.id, principal.session)
                    .as_bytes(),
            );
            if mac.verify_truncated_left(&presented).is_ok() {
                return Ok(());
            }
        }
        Err(AuthenticityError::Invalid)
    }
}

impl NonceAuthority for HmacNonceAuthority {
    fn issue(&self, principal: &Principal, action: &str) -> String {
        self.issue_at(principal, action, Utc::now())
    }

    fn verify(
        &self,
        token: &str,
        principal: &Principal,
        action: &str,
    ) -> Result<(), AuthenticityError> {
        self.verify_at(token, principal, action, Utc::now())
    }
}

static REFERER_NONCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{}=([\w-]+)", regex::escape(NONCE_PARAM)))
        .expect("nonce pattern is valid")
});

/// Finds the nonce presented by a request.
///
/// Looks at the request parameter, then the form's embedded referer field,
/// then the `Referer` header.
pub fn retrieve_nonce(ctx: &RequestContext) -> Option<String> {
    if let Some(token) = ctx.param(NONCE_PARAM) {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    [ctx.param(FORM_REFERER_FIELD), ctx.header(REFERER)]
        .into_iter()
        .flatten()
        .find_map(|url| {
            REFERER_NONCE
                .captures(url)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
}

/// Appends the nonce parameter to a URL, keeping any fragment last.
pub fn with_nonce_param(url: &str, nonce: &str) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    if base.contains(&format!("{}=", NONCE_PARAM)) {
        return url.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut out = format!("{}{}{}={}", base, separator, NONCE_PARAM, nonce);
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

static URL_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(href|src|action)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("attribute pattern is valid")
});

static FORM_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<form\b[^>]*>").expect("form pattern is valid")
});

/// Whether `value`, relative to `page`, points into one of `surfaces` on the same host.
fn targets_surface(value: &str, page: &Url, surfaces: &[&str]) -> bool {
    let value = value.trim();
    if value.is_empty() || value.starts_with('#') {
        return false;
    }
    let Ok(target) = page.join(value) else {
        return false;
    };
    if !matches!(target.scheme(), "http" | "https") || target.host_str() != page.host_str() {
        return false;
    }
    surfaces
        .iter()
        .any(|surface| !surface.is_empty() && target.path().starts_with(surface))
}

/// Adds `nonce` to markup rendered for an authenticated principal.
///
/// `href`, `src` and `action` attributes resolving (against `page`) to a
/// same-host URL under one of `surfaces` carry the nonce parameter; forms
/// posting there also get a hidden input. External URLs are left alone.
pub fn attach_nonce(markup: &str, nonce: &str, page: &Url, surfaces: &[&str]) -> String {
    let rewritten = URL_ATTRIBUTE.replace_all(markup, |caps: &regex::Captures| {
        let (value, quote) = match (caps.get(3), caps.get(4)) {
            (Some(v), _) => (v.as_str(), '"'),
            (None, Some(v)) => (v.as_str(), '\''),
            (None, None) => return caps[0].to_string(),
        };
        if !targets_surface(value, page, surfaces) {
            return caps[0].to_string();
        }
        format!(
            "{}{}{}{}{}",
            &caps[1],
            &caps[2],
            quote,
            with_nonce_param(value, nonce),
            quote
        )
    });

    let page_on_surface = targets_surface(page.as_str(), page, surfaces);
    FORM_OPEN
        .replace_all(&rewritten, |caps: &regex::Captures| {
            let tag = &caps[0];
            let action = URL_ATTRIBUTE
                .captures_iter(tag)
                .find(|c| c[1].eq_ignore_ascii_case("action"))
                .and_then(|c| c.get(3).or_else(|| c.get(4)))
                .map(|m| m.as_str().to_string());
            let posts_to_surface = match action {
                Some(action) => targets_surface(&action, page, surfaces),
                None => page_on_surface,
            };
            if posts_to_surface {
                format!(
                    "{}<input type=\"hidden\" name=\"{}\" value=\"{}\">",
                    tag, NONCE_PARAM, nonce
                )
            } else {
                tag.to_string()
            }
        })
        .into_owned()
}
