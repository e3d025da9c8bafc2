//! Admin HTTP API.
//!
//! Served on its own listener; every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/rules", get(list_rules).post(create_rule))
        .route("/admin/rules/{id}", get(get_rule).put(update_rule).delete(delete_rule))
        .route("/admin/chains", get(get_chains))
        .route("/admin/chains/loops", get(get_loops))
        .route("/admin/chains/trace", get(get_trace))
        .route("/admin/chains/fix", post(post_fix_chains))
        .route("/admin/aging/candidates", get(get_aging_candidates))
        .route("/admin/aging/apply", post(post_aging_apply))
        .route("/admin/aging/last", get(get_aging_last))
        .route("/admin/test", post(post_test))
        .route("/admin/duplicates", get(get_duplicates))
        .route("/admin/export/{format}", get(get_export))
        .route("/admin/stats", get(get_stats))
        .route("/admin/stats/daily", get(get_daily_stats))
        .route("/admin/404s", get(list_not_found))
        .route("/admin/404s/{id}", get(get_not_found).delete(delete_not_found))
        .route("/admin/404s/{id}/resolve", post(post_resolve_not_found))
        .route("/admin/cache/invalidate", post(post_cache_invalidate))
        .route("/admin/content/moved", post(post_content_moved))
        .route("/admin/content/deleted", post(post_content_deleted))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
