//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use redirect_engine::admin::setup_admin_router;
use redirect_engine::config::EngineConfig;
use redirect_engine::http::{AppState, HttpServer};
use redirect_engine::lifecycle::Shutdown;
use redirect_engine::rules::{JsonRuleStore, RuleDraft, RuleId, RuleStore};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const ADMIN_KEY: &str = "integration-test-key";

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// State over an in-memory store seeded with `drafts`, in order.
pub fn app_state(config: EngineConfig, drafts: Vec<RuleDraft>) -> (AppState, Vec<RuleId>) {
    let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::in_memory());
    let state = AppState::new(config, store);
    let ids = drafts
        .into_iter()
        .map(|d| state.manager.save_rule(d).expect("seed rule").id)
        .collect();
    (state, ids)
}

pub fn redirect_router(state: &AppState) -> Router {
    HttpServer::new(state.clone()).router()
}

pub fn admin_router(state: &AppState) -> Router {
    setup_admin_router(state.clone())
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_text(res: Response) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(res: Response) -> Value {
    serde_json::from_str(&body_text(res).await).unwrap()
}

/// Serve the redirect router on an ephemeral port until `shutdown` fires.
pub async fn start_server(state: &AppState, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(state.clone());
    tokio::spawn(server.run(listener, shutdown.subscribe()));
    addr
}
