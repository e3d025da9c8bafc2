//! Match result to HTTP response.
//!
//! # Design Decisions
//! - 301/308 are cacheable for a year; everything else is no-cache
//! - 410 carries no `Location`
//! - Pass-through is a plain 404: nothing sits behind this server

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use url::{Position, Url};

use crate::routing::matcher::MatchResult;
use crate::rules::normalize::is_absolute;

pub const X_REDIRECT_BY: &str = "x-redirect-by";
pub const REDIRECT_BY: &str = "redirect-engine";

pub const PERMANENT_CACHE_CONTROL: &str = "public, max-age=31536000";
pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

impl IntoResponse for MatchResult {
    fn into_response(self) -> Response {
        match self {
            MatchResult::PassThrough => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            MatchResult::Gone => Response::builder()
                .status(StatusCode::GONE)
                .header(header::CACHE_CONTROL, NO_CACHE)
                .header(X_REDIRECT_BY, REDIRECT_BY)
                .body(Body::from("Gone"))
                .unwrap_or_else(|_| StatusCode::GONE.into_response()),
            MatchResult::Redirect { target, status } => {
                let code = StatusCode::from_u16(status.code()).unwrap_or(StatusCode::FOUND);
                let cache_control = if status.is_permanent() {
                    PERMANENT_CACHE_CONTROL
                } else {
                    NO_CACHE
                };
                Response::builder()
                    .status(code)
                    .header(header::LOCATION, location_value(&target))
                    .header(header::CACHE_CONTROL, cache_control)
                    .header(X_REDIRECT_BY, REDIRECT_BY)
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

/// `Location` header for a target. Anything outside visible ASCII is
/// serialized through `url`, which percent-encodes it (and punycodes hosts).
pub fn location_value(target: &str) -> HeaderValue {
    if target.is_ascii() {
        if let Ok(value) = HeaderValue::from_str(target) {
            return value;
        }
    }
    encode_target(target)
        .and_then(|encoded| HeaderValue::from_str(&encoded).ok())
        .unwrap_or_else(|| HeaderValue::from_static("/"))
}

fn encode_target(target: &str) -> Option<String> {
    if let Some(rest) = target.strip_prefix("//") {
        let url = Url::parse(&format!("http://{}", rest)).ok()?;
        return Some(url.as_str().trim_start_matches("http:").to_string());
    }
    if is_absolute(target) {
        return Url::parse(target).ok().map(String::from);
    }
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(target).ok()?;
    Some(url[Position::BeforePath..].to_string())
}
