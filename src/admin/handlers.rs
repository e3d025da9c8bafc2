use std::collections::HashMap;
use std::net::IpAddr;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aging::{CleanupAction, CleanupReport};
use crate::analysis::{
    export_rules, find_all_chains, find_duplicates, find_loops, fix_chains, test_path, trace_chain,
    Chain, ChainFixReport, ChainStep, DuplicateGroup, ExportFormat, PathTestReport, MAX_HOPS,
};
use crate::conditions::{Principal, RequestContext};
use crate::http::server::AppState;
use crate::notfound::{EntryId, NotFoundEntry, NotFoundPage, NotFoundQuery};
use crate::rules::manager::ContentMoved;
use crate::rules::{DailyHits, Rule, RuleDraft, RuleId, SavedRule, StoreError};

/// Admin API failure, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("rule {0} not found")]
    NotFound(RuleId),

    #[error("404 log entry {0} not found")]
    EntryNotFound(EntryId),

    #[error("{0}")]
    BadRequest(String),
}

impl AdminError {
    fn status(&self) -> StatusCode {
        match self {
            AdminError::NotFound(_)
            | AdminError::EntryNotFound(_)
            | AdminError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AdminError::Store(StoreError::Invalid(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Admin request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

type AdminResult<T> = Result<T, AdminError>;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub rules_total: usize,
    pub rules_active: usize,
    pub cache_warm: bool,
    pub cache_ttl_secs: u64,
    pub not_found_entries: usize,
    pub not_found_last_hour: usize,
}

pub async fn get_status(State(state): State<AppState>) -> AdminResult<Json<SystemStatus>> {
    let rules = state.manager.list_rules()?;
    let cache = state.manager.cache();
    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        rules_total: rules.len(),
        rules_active: rules.iter().filter(|r| r.is_active).count(),
        cache_warm: cache.is_warm(),
        cache_ttl_secs: cache.ttl().as_secs(),
        not_found_entries: state.not_found.len(),
        not_found_last_hour: state.not_found.count_last_hour(Utc::now()),
    }))
}

/// Filters for rule listing. All are optional and combine with AND.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuleFilter {
    pub active: Option<bool>,
    pub regex: Option<bool>,
    pub status: Option<u16>,
    pub group: Option<String>,
    pub provenance: Option<String>,
    /// Substring of source or target.
    pub q: Option<String>,
}

impl RuleFilter {
    fn matches(&self, rule: &Rule) -> bool {
        self.active.map_or(true, |a| rule.is_active == a)
            && self.regex.map_or(true, |r| rule.is_regex == r)
            && self.status.map_or(true, |s| rule.status.code() == s)
            && self.group.as_deref().map_or(true, |g| rule.group.as_deref() == Some(g))
            && self
                .provenance
                .as_deref()
                .map_or(true, |p| rule.provenance.as_str() == p)
            && self
                .q
                .as_deref()
                .map_or(true, |q| rule.source.contains(q) || rule.target.contains(q))
    }
}

pub async fn list_rules(
    State(state): State<AppState>,
    Query(filter): Query<RuleFilter>,
) -> AdminResult<Json<Vec<Rule>>> {
    let rules = state.manager.list_rules()?;
    Ok(Json(rules.into_iter().filter(|r| filter.matches(r)).collect()))
}

pub async fn get_rule(State(state): State<AppState>, Path(id): Path<RuleId>) -> AdminResult<Json<Rule>> {
    state
        .manager
        .get_rule(id)?
        .map(Json)
        .ok_or(AdminError::NotFound(id))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(mut draft): Json<RuleDraft>,
) -> AdminResult<(StatusCode, Json<SavedRule>)> {
    draft.id = None;
    let saved = state.manager.save_rule(draft)?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<RuleId>,
    Json(mut draft): Json<RuleDraft>,
) -> AdminResult<Json<SavedRule>> {
    draft.id = Some(id);
    Ok(Json(state.manager.save_rule(draft)?))
}

pub async fn delete_rule(State(state): State<AppState>, Path(id): Path<RuleId>) -> AdminResult<StatusCode> {
    if state.manager.delete_rule(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::NotFound(id))
    }
}

fn active_rules(state: &AppState) -> AdminResult<Vec<Rule>> {
    Ok(state.manager.store().load_active_rules(Utc::now())?)
}

pub async fn get_chains(State(state): State<AppState>) -> AdminResult<Json<Vec<Chain>>> {
    Ok(Json(find_all_chains(&active_rules(&state)?)))
}

pub async fn get_loops(State(state): State<AppState>) -> AdminResult<Json<Vec<Chain>>> {
    Ok(Json(find_loops(&active_rules(&state)?)))
}

#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    pub url: String,
    pub max_depth: Option<usize>,
}

pub async fn get_trace(
    State(state): State<AppState>,
    Query(query): Query<TraceQuery>,
) -> AdminResult<Json<Vec<ChainStep>>> {
    let depth = query.max_depth.unwrap_or(MAX_HOPS).min(MAX_HOPS);
    Ok(Json(trace_chain(&active_rules(&state)?, &query.url, depth)))
}

pub async fn post_fix_chains(State(state): State<AppState>) -> AdminResult<Json<ChainFixReport>> {
    Ok(Json(fix_chains(&state.manager)?))
}

pub async fn get_aging_candidates(State(state): State<AppState>) -> AdminResult<Json<Vec<Rule>>> {
    Ok(Json(state.aging.candidates()?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AgingApplyRequest {
    /// Overrides the configured action for this run.
    pub action: Option<CleanupAction>,
}

/// An empty body runs the configured action.
pub async fn post_aging_apply(State(state): State<AppState>, body: Bytes) -> AdminResult<Json<CleanupReport>> {
    let request: AgingApplyRequest = if body.is_empty() {
        AgingApplyRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AdminError::BadRequest(e.to_string()))?
    };
    let action = request.action.unwrap_or(state.aging.settings().action);
    Ok(Json(state.aging.run_with(action)?))
}

pub async fn get_aging_last(State(state): State<AppState>) -> Json<Option<CleanupReport>> {
    Json(state.aging.last_report())
}

/// A synthetic request for the path tester.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TestRequest {
    pub url: String,
    pub method: Option<String>,
    pub host: Option<String>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub client_ip: Option<IpAddr>,
    pub principal: Option<Principal>,
    /// Evaluate time-based conditions at this instant instead of now.
    pub at: Option<DateTime<FixedOffset>>,
}

impl TestRequest {
    fn into_context(self) -> RequestContext {
        let mut ctx = RequestContext::new(&self.url);
        if let Some(method) = &self.method {
            ctx = ctx.with_method(method);
        }
        if let Some(host) = &self.host {
            ctx = ctx.with_host(host);
        }
        for (name, value) in self.headers {
            ctx = ctx.with_header(&name, value);
        }
        for (name, value) in self.cookies {
            ctx = ctx.with_cookie(name, value);
        }
        for (name, value) in self.query {
            ctx = ctx.with_query_param(name, value);
        }
        if let Some(ip) = self.client_ip {
            ctx = ctx.with_client_ip(ip);
        }
        if let Some(principal) = self.principal {
            ctx = ctx.with_principal(principal);
        }
        if let Some(at) = self.at {
            ctx = ctx.at(at);
        }
        ctx
    }
}

#[derive(Serialize)]
pub struct TestResponse {
    /// The path falls under an excluded prefix; live traffic would not be redirected.
    pub excluded: bool,
    #[serde(flatten)]
    pub report: PathTestReport,
}

pub async fn post_test(
    State(state): State<AppState>,
    Json(request): Json<TestRequest>,
) -> AdminResult<Json<TestResponse>> {
    if request.url.trim().is_empty() {
        return Err(AdminError::BadRequest("url is required".into()));
    }
    let ctx = request.into_context();
    let rules = state.redirector.cache().get_active_rules();
    Ok(Json(TestResponse {
        excluded: state.redirector.is_excluded(&ctx.path),
        report: test_path(&rules, &ctx),
    }))
}

pub async fn get_duplicates(State(state): State<AppState>) -> AdminResult<Json<Vec<DuplicateGroup>>> {
    Ok(Json(find_duplicates(&state.manager.list_rules()?)))
}

pub async fn get_export(State(state): State<AppState>, Path(format): Path<String>) -> AdminResult<Response> {
    let format: ExportFormat = format.parse().map_err(AdminError::BadRequest)?;
    let body = export_rules(&active_rules(&state)?, format, Utc::now());
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TopRule {
    pub id: RuleId,
    pub source: String,
    pub hit_count: u64,
    pub last_hit: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RuleStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub regex: usize,
    pub gone: usize,
    pub total_hits: u64,
    pub top: Vec<TopRule>,
}

pub fn summarize(rules: &[Rule], limit: usize) -> RuleStats {
    let mut by_hits: Vec<&Rule> = rules.iter().filter(|r| r.hit_count > 0).collect();
    by_hits.sort_by(|a, b| b.hit_count.cmp(&a.hit_count).then(a.id.cmp(&b.id)));

    RuleStats {
        total: rules.len(),
        active: rules.iter().filter(|r| r.is_active).count(),
        inactive: rules.iter().filter(|r| !r.is_active).count(),
        regex: rules.iter().filter(|r| r.is_regex).count(),
        gone: rules.iter().filter(|r| r.status.is_gone()).count(),
        total_hits: rules.iter().map(|r| r.hit_count).sum(),
        top: by_hits
            .into_iter()
            .take(limit)
            .map(|r| TopRule {
                id: r.id,
                source: r.source.clone(),
                hit_count: r.hit_count,
                last_hit: r.last_hit,
            })
            .collect(),
    }
}

pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> AdminResult<Json<RuleStats>> {
    let rules = state.manager.list_rules()?;
    Ok(Json(summarize(&rules, query.limit.unwrap_or(10))))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DailyStatsQuery {
    /// Days to look back, today included. Defaults to 30.
    pub days: Option<u32>,
    pub rule: Option<RuleId>,
}

pub async fn get_daily_stats(
    State(state): State<AppState>,
    Query(query): Query<DailyStatsQuery>,
) -> AdminResult<Json<Vec<DailyHits>>> {
    let days = query.days.unwrap_or(30).max(1);
    let since = Utc::now().date_naive() - Duration::days(i64::from(days) - 1);
    Ok(Json(state.manager.store().daily_hits(since, query.rule)?))
}

pub async fn list_not_found(
    State(state): State<AppState>,
    Query(query): Query<NotFoundQuery>,
) -> Json<NotFoundPage> {
    Json(state.not_found.list(&query))
}

pub async fn get_not_found(
    State(state): State<AppState>,
    Path(id): Path<EntryId>,
) -> AdminResult<Json<NotFoundEntry>> {
    state
        .not_found
        .get(id)
        .map(Json)
        .ok_or(AdminError::EntryNotFound(id))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResolveRequest {
    /// Rule that now answers the path.
    pub redirect_id: Option<RuleId>,
}

/// Mark a 404 entry resolved. The body is optional.
pub async fn post_resolve_not_found(
    State(state): State<AppState>,
    Path(id): Path<EntryId>,
    body: Bytes,
) -> AdminResult<Json<NotFoundEntry>> {
    let request: ResolveRequest = if body.is_empty() {
        ResolveRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AdminError::BadRequest(e.to_string()))?
    };
    if let Some(rule_id) = request.redirect_id {
        if state.manager.get_rule(rule_id)?.is_none() {
            return Err(AdminError::BadRequest(format!("rule {} does not exist", rule_id)));
        }
    }

    if !state.not_found.resolve(id, request.redirect_id) {
        return Err(AdminError::EntryNotFound(id));
    }
    tracing::info!(entry_id = id, redirect_id = ?request.redirect_id, "404 entry resolved");
    get_not_found(State(state), Path(id)).await
}

pub async fn delete_not_found(State(state): State<AppState>, Path(id): Path<EntryId>) -> StatusCode {
    if state.not_found.delete(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn post_cache_invalidate(State(state): State<AppState>) -> StatusCode {
    state.manager.cache().invalidate();
    tracing::info!("Rule cache invalidated by admin request");
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct ContentMovedRequest {
    pub old_url: String,
    pub new_url: String,
}

pub async fn post_content_moved(
    State(state): State<AppState>,
    Json(req): Json<ContentMovedRequest>,
) -> AdminResult<Json<ContentMoved>> {
    Ok(Json(state.manager.on_content_moved(&req.old_url, &req.new_url)?))
}

#[derive(Debug, Deserialize)]
pub struct ContentDeletedRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ContentDeleted {
    pub created: Option<RuleId>,
}

pub async fn post_content_deleted(
    State(state): State<AppState>,
    Json(req): Json<ContentDeletedRequest>,
) -> AdminResult<Json<ContentDeleted>> {
    Ok(Json(ContentDeleted {
        created: state.manager.on_content_deleted(&req.url)?,
    }))
}
