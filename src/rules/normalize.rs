//! URL normalization.
//!
//! Every incoming request path and every stored exact source goes through
//! [`normalize`] so that both sides of a comparison share one canonical form:
//!
//! - scheme and host are stripped
//! - the path always starts with `/`
//! - the path is lower-cased, the query string is kept verbatim
//! - trailing slashes are removed unless the path is exactly `/`
//! - fragments are dropped
//!
//! Empty or unparsable input becomes `/`. The function is idempotent.

use url::Url;

/// Canonicalize a raw URL, path, or path+query.
pub fn normalize(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return "/".to_string();
    }

    let (path, query) = match split_url(raw) {
        Some(parts) => parts,
        None => return "/".to_string(),
    };

    let mut out = String::with_capacity(path.len() + query.map_or(0, |q| q.len() + 1));
    out.push('/');
    out.push_str(&path.trim_start_matches('/').to_lowercase());

    while out.len() > 1 && (out.ends_with('/') || out.ends_with(char::is_whitespace)) {
        out.pop();
    }

    if let Some(query) = query.map(str::trim_end).filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Whether `target` is an absolute or scheme-relative URL (as opposed to a
/// site-relative path).
pub fn is_absolute(target: &str) -> bool {
    let target = target.trim();
    if target.starts_with("//") {
        return true;
    }
    match target.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Split into (path, query). Absolute and scheme-relative URLs are parsed with
/// `url`; everything else is treated as a path with an optional query.
fn split_url(raw: &str) -> Option<(String, Option<&str>)> {
    if is_absolute(raw) {
        let parsed = if raw.starts_with("//") {
            Url::parse(&format!("http:{}", raw))
        } else {
            Url::parse(raw)
        };
        let url = parsed.ok()?;
        // Borrow the query back out of the raw input so it stays verbatim.
        let query = url.query().and_then(|_| {
            raw.split_once('?')
                .map(|(_, rest)| rest.split('#').next().unwrap_or(rest))
        });
        return Some((url.path().to_string(), query));
    }

    let without_fragment = raw.split('#').next().unwrap_or(raw);
    match without_fragment.split_once('?') {
        Some((path, query)) => Some((path.to_string(), Some(query))),
        None => Some((without_fragment.to_string(), None)),
    }
}
