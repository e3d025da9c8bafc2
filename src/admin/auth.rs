use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;

/// Bearer-token check against the live admin key. An empty key locks the API.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let config = state.config();
    let expected = config.admin.api_key.trim();

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !expected.is_empty() && token == expected);

    if authorized {
        return Ok(next.run(request).await);
    }

    tracing::warn!(uri = %request.uri(), "Rejected admin request");
    Err(StatusCode::UNAUTHORIZED)
}
