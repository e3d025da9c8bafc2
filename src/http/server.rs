//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the redirect handler
//! - Wire up middleware (request ID, tracing, timeout)
//! - Bind server to listener and stop on the shutdown broadcast
//! - Hold the shared application state the admin API also uses

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::aging::AgingEngine;
use crate::config::schema::EngineConfig;
use crate::http::request::{build_context, MakeRequestUuid, X_REQUEST_ID};
use crate::notfound::{NotFoundHit, NotFoundLog};
use crate::observability::metrics;
use crate::routing::{MatchResult, Redirector};
use crate::rules::{HitTracker, RuleCache, RuleManager, RuleStore};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<EngineConfig>>,
    pub redirector: Arc<Redirector>,
    pub manager: RuleManager,
    /// Present when hit tracking is enabled.
    pub hits: Option<Arc<HitTracker>>,
    pub aging: Arc<AgingEngine>,
    pub not_found: Arc<NotFoundLog>,
}

impl AppState {
    /// Wire the rule pipeline over `store` according to `config`.
    pub fn new(config: EngineConfig, store: Arc<dyn RuleStore>) -> Self {
        let cache = Arc::new(RuleCache::new(store.clone(), config.cache.ttl()));
        let hits = config.matching.track_hits.then(|| Arc::new(HitTracker::new()));
        let redirector = Arc::new(Redirector::new(
            cache.clone(),
            hits.clone(),
            &config.matching.excluded_paths,
        ));
        let manager = RuleManager::new(store, cache);
        let aging = Arc::new(AgingEngine::new(manager.clone(), config.aging.settings()));
        let not_found = Arc::new(NotFoundLog::new(config.not_found.settings()));

        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            redirector,
            manager,
            hits,
            aging,
            not_found,
        }
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.load_full()
    }

    /// Apply a reloaded configuration to the running pipeline.
    ///
    /// Cache TTL, excluded paths, request handling, aging and 404 log settings
    /// and the admin key take effect immediately; listener addresses, the store
    /// path, hit tracking and task intervals keep their startup values.
    pub fn apply_config(&self, config: EngineConfig) {
        self.redirector.cache().set_ttl(config.cache.ttl());
        self.redirector.set_excluded_paths(&config.matching.excluded_paths);
        self.aging.set_settings(config.aging.settings());
        self.not_found.set_settings(config.not_found.settings());
        self.config.store(Arc::new(config));
        tracing::info!("Configuration applied");
    }
}

/// HTTP server for redirect traffic.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server over the given state.
    pub fn new(state: AppState) -> Self {
        let timeout = Duration::from_secs(state.config().server.request_timeout_secs);
        Self {
            router: build_router(state, timeout),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until the shutdown broadcast fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", any(redirect_handler))
        .route("/{*path}", any(redirect_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Resolve every request against the active rules.
async fn redirect_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    // Absent when the router is driven without a socket (tests, embedding).
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let config = state.config.load();
    let ctx = build_context(
        request.method(),
        request.uri(),
        request.headers(),
        peer,
        &config.request,
    );

    let result = state.redirector.resolve(&ctx);
    tracing::debug!(
        path = %ctx.path,
        outcome = metrics::outcome_label(&result),
        "Request resolved"
    );

    if matches!(result, MatchResult::PassThrough) && !state.redirector.is_excluded(&ctx.path) {
        state.not_found.record(
            NotFoundHit {
                path: ctx.path.clone(),
                client_ip: ctx.client_ip,
                referer: ctx.header("referer").map(str::to_string),
                user_agent: ctx.header("user-agent").map(str::to_string),
            },
            Utc::now(),
        );
    }
    result.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{JsonRuleStore, RuleDraft};
    use axum::http::{header, StatusCode};
    use tower::ServiceExt;

    fn state_with(drafts: Vec<RuleDraft>) -> AppState {
        let state = AppState::new(EngineConfig::default(), Arc::new(JsonRuleStore::in_memory()));
        for draft in drafts {
            state.manager.save_rule(draft).unwrap();
        }
        state
    }

    #[tokio::test]
    async fn test_redirect_through_router() {
        let server = HttpServer::new(state_with(vec![RuleDraft::new("/old", "/new")]));

        let res = server
            .router()
            .oneshot(Request::builder().uri("/old/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[header::LOCATION], "/new");
        assert!(res.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_apply_config_updates_exclusions() {
        let state = state_with(vec![RuleDraft::new("/api/v1", "/api/v2")]);
        let router = HttpServer::new(state.clone()).router();

        let mut config = EngineConfig::default();
        config.matching.excluded_paths = vec!["/api".into()];
        state.apply_config(config);

        let res = router
            .oneshot(Request::builder().uri("/api/v1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(state.not_found.is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_requests_are_logged() {
        let state = state_with(vec![RuleDraft::new("/old", "/new")]);
        let router = HttpServer::new(state.clone()).router();

        for uri in ["/missing/", "/Missing", "/old"] {
            let mut request = Request::builder()
                .uri(uri)
                .header(header::REFERER, "https://ref.example/")
                .body(Body::empty())
                .unwrap();
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 23], 40000))));
            router.clone().oneshot(request).await.unwrap();
        }

        assert_eq!(state.not_found.len(), 1);
        let page = state.not_found.list(&Default::default());
        let entry = &page.items[0];
        assert_eq!(entry.path, "/missing");
        assert_eq!(entry.count, 2);
        assert_eq!(entry.ip, Some("198.51.100.0".parse().unwrap()));
        assert_eq!(entry.referer.as_deref(), Some("https://ref.example/"));
    }
}
