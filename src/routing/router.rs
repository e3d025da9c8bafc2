//! Request resolution.
//!
//! # Responsibilities
//! - Skip excluded path prefixes
//! - Read the active rule set from the cache
//! - Select a rule, evaluate its conditions, record the hit
//! - Return an explicit [`MatchResult`]
//!
//! # Design Decisions
//! - Never fails: a cache load failure reads as an empty rule set
//! - Conditions are evaluated on the selected rule only; when they fail the
//!   request passes through instead of trying later rules
//! - Hits are recorded only when a response is actually produced

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::Utc;

use crate::conditions::RequestContext;
use crate::observability::metrics;
use crate::routing::matcher::MatchResult;
use crate::rules::cache::RuleCache;
use crate::rules::hits::HitTracker;
use crate::rules::normalize::normalize;

/// Hot-path pipeline: normalized request → rule cache → matcher → conditions.
pub struct Redirector {
    cache: Arc<RuleCache>,
    hits: Option<Arc<HitTracker>>,
    excluded_paths: ArcSwap<Vec<String>>,
}

impl Redirector {
    pub fn new(cache: Arc<RuleCache>, hits: Option<Arc<HitTracker>>, excluded_paths: &[String]) -> Self {
        Self {
            cache,
            hits,
            excluded_paths: ArcSwap::from_pointee(normalize_prefixes(excluded_paths)),
        }
    }

    /// Replace the excluded prefixes (config reload).
    pub fn set_excluded_paths(&self, excluded_paths: &[String]) {
        self.excluded_paths
            .store(Arc::new(normalize_prefixes(excluded_paths)));
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths
            .load()
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    /// Resolve a request. `ctx.path` must already be normalized.
    pub fn resolve(&self, ctx: &RequestContext) -> MatchResult {
        let start = Instant::now();

        let outcome = if self.is_excluded(&ctx.path) {
            MatchResult::PassThrough
        } else {
            self.resolve_rules(ctx)
        };

        metrics::record_match(&outcome, start);
        outcome
    }

    fn resolve_rules(&self, ctx: &RequestContext) -> MatchResult {
        let rules = self.cache.get_active_rules();
        let Some(selected) = rules.find(&ctx.path) else {
            return MatchResult::PassThrough;
        };

        if !selected.compiled.conditions().all_pass(ctx) {
            tracing::debug!(rule_id = selected.compiled.id(), path = %ctx.path, "Rule matched but conditions failed");
            return MatchResult::PassThrough;
        }

        let outcome = selected.result(&ctx.path);
        if outcome != MatchResult::PassThrough {
            if let Some(hits) = &self.hits {
                hits.record(selected.compiled.id(), ctx.now.with_timezone(&Utc));
            }
        }
        outcome
    }
}

fn normalize_prefixes(prefixes: &[String]) -> Vec<String> {
    prefixes
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(normalize)
        .filter(|p| p != "/")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::Principal;
    use crate::rules::store::{JsonRuleStore, RuleStore};
    use crate::rules::types::{Condition, RedirectStatus, RuleDraft};
    use std::time::Duration;

    fn redirector(drafts: Vec<RuleDraft>, excluded: &[String]) -> (Redirector, Arc<HitTracker>) {
        let store = Arc::new(JsonRuleStore::in_memory());
        for draft in drafts {
            store.save_rule(draft, Utc::now()).unwrap();
        }
        let cache = Arc::new(RuleCache::new(store, Duration::from_secs(60)));
        let hits = Arc::new(HitTracker::new());
        (Redirector::new(cache, Some(hits.clone()), excluded), hits)
    }

    #[test]
    fn test_conditions_gate_the_selected_rule_only() {
        let (r, hits) = redirector(
            vec![
                RuleDraft::new("/members", "/members/home")
                    .with_condition(Condition::new("login_status", "equals", "logged_in")),
                RuleDraft::regex("^/members$", "/login"),
            ],
            &[],
        );

        // The exact rule is selected; its condition fails and no later rule is tried.
        assert_eq!(r.resolve(&RequestContext::new("/members")), MatchResult::PassThrough);
        assert!(hits.is_empty());

        let ctx = RequestContext::new("/members").with_principal(Principal::new("1"));
        assert_eq!(
            r.resolve(&ctx),
            MatchResult::Redirect {
                target: "/members/home".into(),
                status: RedirectStatus::MovedPermanently
            }
        );
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_excluded_prefixes_pass_through() {
        let (r, _) = redirector(vec![RuleDraft::new("/admin/old", "/admin/new")], &["/Admin/".to_string()]);
        assert_eq!(r.resolve(&RequestContext::new("/admin/old")), MatchResult::PassThrough);

        r.set_excluded_paths(&[]);
        assert!(matches!(r.resolve(&RequestContext::new("/admin/old")), MatchResult::Redirect { .. }));
    }

    #[test]
    fn test_gone_records_hit() {
        let (r, hits) = redirector(vec![RuleDraft::gone("/removed")], &[]);
        assert_eq!(r.resolve(&RequestContext::new("/removed/")), MatchResult::Gone);
        assert_eq!(hits.len(), 1);
    }
}
