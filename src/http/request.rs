//! Request handling.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Build the condition context from an incoming request
//! - Resolve the client IP and the upstream-authenticated principal
//!
//! # Design Decisions
//! - Forwarding headers are ignored unless explicitly trusted
//! - Only syntactically valid IPs are accepted from any source
//! - Headers that are not valid UTF-8 are left out of the context

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderValue, Method, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::conditions::{Principal, RequestContext};
use crate::config::schema::RequestConfig;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Forwarding headers consulted in order when they are trusted.
pub const FORWARDED_IP_HEADERS: [&str; 5] = [
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
];

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Build the condition context for a request.
pub fn build_context(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    config: &RequestConfig,
) -> RequestContext {
    let raw_path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let mut ctx = RequestContext::new(raw_path).with_method(method.as_str());

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host());
    if let Some(host) = host {
        ctx = ctx.with_host(host);
    }

    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            ctx = ctx.with_header(name.as_str(), value);
        }
    }

    if let Some(ip) = resolve_client_ip(headers, peer, config.trust_forwarded_headers) {
        ctx = ctx.with_client_ip(ip);
    }
    if let Some(principal) = principal_from_headers(headers, config) {
        ctx = ctx.with_principal(principal);
    }
    ctx
}

/// Client IP from trusted forwarding headers, falling back to the socket peer.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> Option<IpAddr> {
    if trust_forwarded {
        for name in FORWARDED_IP_HEADERS {
            let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            if let Some(ip) = parse_forwarded_ip(value) {
                return Some(ip);
            }
        }
    }
    peer.map(|addr| addr.ip())
}

/// First entry of a forwarding header value as an IP.
///
/// Accepts bare addresses, `ip:port`, `[v6]:port` and the `for=` form of
/// `Forwarded`.
pub fn parse_forwarded_ip(value: &str) -> Option<IpAddr> {
    let first = value.split(',').next()?.trim();
    let first = first
        .split(';')
        .map(str::trim)
        .find_map(|part| {
            part.strip_prefix("for=")
                .or_else(|| part.strip_prefix("For="))
        })
        .unwrap_or(first)
        .trim_matches('"');

    if let Ok(ip) = first.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = first.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    first
        .strip_prefix('[')
        .and_then(|rest| rest.split(']').next())
        .and_then(|inner| inner.parse::<IpAddr>().ok())
}

/// Principal from the configured identity and role headers.
pub fn principal_from_headers(headers: &HeaderMap, config: &RequestConfig) -> Option<Principal> {
    let id_header = config.identity_header.as_deref()?;
    let id = headers.get(id_header)?.to_str().ok()?.trim();
    if id.is_empty() {
        return None;
    }

    let mut principal = Principal::new(id);
    let roles = config
        .roles_header
        .as_deref()
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    for role in roles.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        principal = principal.with_role(role);
    }
    Some(principal)
}
