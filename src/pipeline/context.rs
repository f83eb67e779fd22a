//! Explicit request state handed to validation.

use std::collections::HashMap;
use std::net::IpAddr;

/// The logged-in principal of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable user identifier
    pub id: String,
    /// Session token of the current login (scopes nonces to the session)
    pub session: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session: session.into(),
        }
    }
}

/// Everything validation may read about the inbound request.
///
/// Built once at the request boundary by the host. Header names are stored
/// lower-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Address of the connected peer as reported by the platform
    pub peer_addr: IpAddr,
    /// Request method, upper-case
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Decoded form body parameters
    pub form: HashMap<String, String>,
    headers: HashMap<String, String>,
    /// Logged-in principal, if any
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(peer_addr: IpAddr, method: &str, path: &str) -> Self {
        Self {
            peer_addr,
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: HashMap::new(),
            form: HashMap::new(),
            headers: HashMap::new(),
            principal: None,
        }
    }

    /// Builds a context from a request URI, splitting off and decoding its query.
    pub fn from_uri(peer_addr: IpAddr, method: &str, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };
        let mut ctx = Self::new(peer_addr, method, path);
        ctx.query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        ctx
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn with_form(mut self, name: &str, value: impl Into<String>) -> Self {
        self.form.insert(name.to_string(), value.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Request parameter; the form body wins over the query string.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .or_else(|| self.query.get(name))
            .map(String::as_str)
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// The request URI (path plus re-encoded query).
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let mut pairs: Vec<_> = self.query.iter().collect();
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("{}?{}", self.path, query)
    }
}
