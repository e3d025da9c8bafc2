//! End-to-end redirect behavior through the HTTP layer.

use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use redirect_engine::http::response::{NO_CACHE, PERMANENT_CACHE_CONTROL, X_REDIRECT_BY};
use redirect_engine::http::X_REQUEST_ID;
use redirect_engine::lifecycle::Shutdown;
use redirect_engine::rules::{Condition, RedirectStatus, RuleDraft};

mod common;

#[tokio::test]
async fn test_status_codes_and_cache_headers() {
    let (state, _) = common::app_state(
        common::test_config(),
        vec![
            RuleDraft::new("/old", "/new"),
            RuleDraft::new("/moved", "https://example.com/elsewhere").with_status(RedirectStatus::PermanentRedirect),
            RuleDraft::new("/promo", "/sale").with_status(RedirectStatus::TemporaryRedirect),
            RuleDraft::gone("/retired"),
        ],
    );
    let router = common::redirect_router(&state);

    let res = common::send(&router, common::get("/OLD/")).await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(res.headers()[header::LOCATION], "/new");
    assert_eq!(res.headers()[header::CACHE_CONTROL], PERMANENT_CACHE_CONTROL);
    assert!(res.headers().contains_key(X_REDIRECT_BY));

    let res = common::send(&router, common::get("/moved")).await;
    assert_eq!(res.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(res.headers()[header::LOCATION], "https://example.com/elsewhere");

    let res = common::send(&router, common::get("/promo")).await;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(res.headers()[header::CACHE_CONTROL], NO_CACHE);

    let res = common::send(&router, common::get("/retired")).await;
    assert_eq!(res.status(), StatusCode::GONE);
    assert!(res.headers().get(header::LOCATION).is_none());

    let res = common::send(&router, common::get("/unknown")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pattern_rules_and_precedence() {
    let (state, _) = common::app_state(
        common::test_config(),
        vec![
            RuleDraft::regex(r"^/blog/(\d+)/(.+)$", "/posts/$2?id=$1"),
            RuleDraft::regex(r"^/blog/.*$", "/archive"),
            RuleDraft::new("/blog/1/special", "/special"),
            RuleDraft::new("/loop", "/loop"),
        ],
    );
    let router = common::redirect_router(&state);

    let res = common::send(&router, common::get("/blog/42/hello-world")).await;
    assert_eq!(res.headers()[header::LOCATION], "/posts/hello-world?id=42");

    // Exact rules beat patterns regardless of id.
    let res = common::send(&router, common::get("/blog/1/special")).await;
    assert_eq!(res.headers()[header::LOCATION], "/special");

    // First pattern (lowest id) wins.
    let res = common::send(&router, common::get("/blog/about")).await;
    assert_eq!(res.headers()[header::LOCATION], "/archive");

    // Self-redirect suppressed.
    let res = common::send(&router, common::get("/loop")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conditions_gate_only_the_selected_rule() {
    let (state, _) = common::app_state(
        common::test_config(),
        vec![
            RuleDraft::new("/beta", "/beta/app")
                .with_condition(Condition::new("cookie", "exists", "beta_tester")),
            RuleDraft::regex("^/beta$", "/fallback"),
            RuleDraft::new("/app", "/m/app")
                .with_status(RedirectStatus::Found)
                .with_condition(Condition::new("device_type", "equals", "mobile")),
        ],
    );
    let router = common::redirect_router(&state);

    // The pattern rule is not consulted when the exact rule's conditions fail.
    let res = common::send(&router, common::get("/beta")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let req = axum::http::Request::builder()
        .uri("/beta")
        .header(header::COOKIE, "beta_tester=1; theme=dark")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = common::send(&router, req).await;
    assert_eq!(res.headers()[header::LOCATION], "/beta/app");

    let req = axum::http::Request::builder()
        .uri("/app")
        .header(
            header::USER_AGENT,
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148",
        )
        .body(axum::body::Body::empty())
        .unwrap();
    let res = common::send(&router, req).await;
    assert_eq!(res.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_excluded_inactive_and_expired_rules() {
    let mut config = common::test_config();
    config.matching.excluded_paths = vec!["/wp-admin".into()];
    let (state, _) = common::app_state(
        config,
        vec![
            RuleDraft::new("/wp-admin/old", "/wp-admin/new"),
            RuleDraft::new("/paused", "/x").inactive(),
            RuleDraft::new("/expired", "/x").with_expiry(Utc::now() - Duration::hours(1)),
            RuleDraft::new("/later", "/x").with_expiry(Utc::now() + Duration::days(1)),
        ],
    );
    let router = common::redirect_router(&state);

    for path in ["/wp-admin/old", "/paused", "/expired"] {
        let res = common::send(&router, common::get(path)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
    }
    let res = common::send(&router, common::get("/later")).await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
}

#[tokio::test]
async fn test_writes_are_visible_immediately() {
    let (state, _) = common::app_state(common::test_config(), vec![RuleDraft::new("/a", "/b")]);
    let router = common::redirect_router(&state);

    // Warm the cache, then write.
    let res = common::send(&router, common::get("/c")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(state.manager.cache().is_warm());

    state.manager.save_rule(RuleDraft::new("/c", "/d")).unwrap();
    let res = common::send(&router, common::get("/c")).await;
    assert_eq!(res.headers()[header::LOCATION], "/d");
}

#[tokio::test]
async fn test_hits_recorded_only_when_rule_fires() {
    let (state, ids) = common::app_state(
        common::test_config(),
        vec![
            RuleDraft::new("/counted", "/x"),
            RuleDraft::new("/gated", "/y").with_condition(Condition::new("request_method", "equals", "POST")),
        ],
    );
    let router = common::redirect_router(&state);

    common::send(&router, common::get("/counted")).await;
    common::send(&router, common::get("/counted")).await;
    common::send(&router, common::get("/gated")).await;

    let tracker = state.hits.clone().expect("hit tracking enabled by default");
    assert_eq!(tracker.len(), 1);
    tracker.flush(state.manager.store().as_ref()).unwrap();

    let counted = state.manager.get_rule(ids[0]).unwrap().unwrap();
    assert_eq!(counted.hit_count, 2);
    assert!(counted.last_hit.is_some());
    let gated = state.manager.get_rule(ids[1]).unwrap().unwrap();
    assert_eq!(gated.hit_count, 0);
}

#[tokio::test]
async fn test_live_server_round_trip() {
    let (state, _) = common::app_state(common::test_config(), vec![RuleDraft::new("/old", "/new")]);
    let shutdown = Shutdown::new();
    let addr = common::start_server(&state, &shutdown).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let res = client.get(format!("http://{}/old", addr)).send().await.unwrap();

    assert_eq!(res.status().as_u16(), 301);
    assert_eq!(res.headers()["location"], "/new");
    assert!(res.headers().contains_key(X_REQUEST_ID));

    shutdown.trigger();
}
