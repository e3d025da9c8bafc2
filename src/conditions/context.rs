//! Request context handed to condition checks.
//!
//! # Responsibilities
//! - Carry every request-scoped input a condition may look at
//! - Provide case-insensitive header lookup
//! - Parse cookie headers and query strings into maps
//!
//! # Design Decisions
//! - Checks never read ambient request state; the serving layer (or a test)
//!   builds the context explicitly
//! - Header names are stored lower-cased
//! - The clock lives in the context so time checks are deterministic under test

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::normalize::normalize;

/// Identity supplied by an upstream authentication layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Inputs a live request supplies to condition evaluation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Upper-cased HTTP method.
    pub method: String,
    /// Lower-cased host without port.
    pub host: String,
    /// Normalized path and query.
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub client_ip: Option<IpAddr>,
    pub principal: Option<Principal>,
    pub now: DateTime<FixedOffset>,
}

impl RequestContext {
    /// A `GET` context for `path` at the current UTC time.
    ///
    /// The path is normalized and any query it carries is parsed into the
    /// query-parameter map.
    pub fn new(path: &str) -> Self {
        let path = normalize(path);
        let query = path
            .split_once('?')
            .map(|(_, q)| parse_query(q))
            .unwrap_or_default();

        Self {
            method: "GET".to_string(),
            host: String::new(),
            path,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            query,
            client_ip: None,
            principal: None,
            now: Utc::now().fixed_offset(),
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = strip_port(host).to_ascii_lowercase();
        self
    }

    /// Add a header. A `cookie` header is also parsed into the cookie map.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        if name == "cookie" {
            self.cookies.extend(parse_cookie_header(&value));
        }
        self.headers.insert(name, value);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn at(mut self, now: DateTime<FixedOffset>) -> Self {
        self.now = now;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Header value or the empty string when absent.
    pub fn header_or_empty(&self, name: &str) -> &str {
        self.header(name).unwrap_or("")
    }
}

/// Parse a `Cookie` header (`a=1; b=2`) into a map. Later duplicates win.
pub fn parse_cookie_header(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse a query string into a map of decoded parameters.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Drop a `:port` suffix, leaving bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    let host = host.trim();
    if host.starts_with('[') {
        return host.split(']').next().map_or(host, |h| &host[..h.len() + 1]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
