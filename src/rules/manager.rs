//! Rule write path.
//!
//! Every administrative or automatic mutation goes through [`RuleManager`],
//! which forwards it to the store and then invalidates the rule cache exactly
//! once. Failures are returned to the caller, never swallowed.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::conditions::evaluator::condition_problems;
use crate::routing::matcher::{compile_pattern, RuleWarning};
use crate::rules::cache::RuleCache;
use crate::rules::normalize::normalize;
use crate::rules::store::{prepare_draft, RuleStore, StoreResult};
use crate::rules::types::{Provenance, RedirectStatus, Rule, RuleDraft, RuleId, RuleMutation};

/// Result of a successful save.
#[derive(Debug, Clone, Serialize)]
pub struct SavedRule {
    pub id: RuleId,
    /// Problems that do not block the save but keep the rule from behaving as intended.
    pub warnings: Vec<RuleWarning>,
}

/// Outcome of [`RuleManager::on_content_moved`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentMoved {
    pub created: Option<RuleId>,
    pub repointed: usize,
}

/// Store + cache, with invalidate-once semantics for every write.
#[derive(Clone)]
pub struct RuleManager {
    store: Arc<dyn RuleStore>,
    cache: Arc<RuleCache>,
}

impl RuleManager {
    pub fn new(store: Arc<dyn RuleStore>, cache: Arc<RuleCache>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    pub fn list_rules(&self) -> StoreResult<Vec<Rule>> {
        self.store.list_rules()
    }

    pub fn get_rule(&self, id: RuleId) -> StoreResult<Option<Rule>> {
        self.store.get_rule(id)
    }

    /// Create (`draft.id == None`) or update a rule.
    pub fn save_rule(&self, draft: RuleDraft) -> StoreResult<SavedRule> {
        let draft = prepare_draft(draft)?;
        let warnings = draft_warnings(&draft);

        let id = self.store.save_rule(draft, Utc::now())?;
        self.cache.invalidate();

        for w in &warnings {
            tracing::warn!(rule_id = id, source = %w.source, message = %w.message, "Rule saved with warning");
        }
        tracing::info!(rule_id = id, "Rule saved");
        Ok(SavedRule { id, warnings })
    }

    pub fn delete_rule(&self, id: RuleId) -> StoreResult<bool> {
        let deleted = self.store.delete_rule(id)?;
        self.cache.invalidate();
        if deleted {
            tracing::info!(rule_id = id, "Rule deleted");
        }
        Ok(deleted)
    }

    /// Apply a batch and invalidate once. An empty batch is a no-op.
    /// Returns the ids that were changed.
    pub fn apply_batch(&self, mutations: &[RuleMutation]) -> StoreResult<Vec<RuleId>> {
        if mutations.is_empty() {
            return Ok(Vec::new());
        }
        let applied = self.store.apply_batch(mutations, Utc::now())?;
        self.cache.invalidate();
        tracing::info!(requested = mutations.len(), applied = applied.len(), "Rule batch applied");
        Ok(applied)
    }

    /// Content moved from `old_url` to `new_url`.
    ///
    /// Creates an `auto` redirect old → new unless the URLs normalize to the
    /// same path or an exact rule for the old URL already exists, and repoints
    /// every exact rule targeting the old URL at the new one.
    pub fn on_content_moved(&self, old_url: &str, new_url: &str) -> StoreResult<ContentMoved> {
        let old = normalize(old_url);
        let new = normalize(new_url);
        if old == new {
            return Ok(ContentMoved::default());
        }

        let rules = self.store.list_rules()?;
        let now = Utc::now();

        let repoints: Vec<RuleMutation> = rules
            .iter()
            .filter(|r| !r.is_regex && !r.status.is_gone())
            .filter(|r| normalize(&r.target) == old && normalize(&r.source) != new)
            .map(|r| RuleMutation::SetTarget {
                id: r.id,
                target: new.clone(),
            })
            .collect();

        // One write either way: nothing is stored if it fails.
        let exists = rules.iter().any(|r| !r.is_regex && normalize(&r.source) == old);
        let (created, repointed) = if exists {
            (None, self.store.apply_batch(&repoints, now)?.len())
        } else {
            let draft = RuleDraft::new(old.clone(), new.clone()).with_provenance(Provenance::Auto);
            let (id, repointed) = self.store.insert_with_batch(draft, &repoints, now)?;
            (Some(id), repointed)
        };

        self.cache.invalidate();
        tracing::info!(old = %old, new = %new, created = ?created, repointed, "Content moved");
        Ok(ContentMoved { created, repointed })
    }

    /// Content at `url` was deleted: create an `auto_410` rule unless one exists.
    pub fn on_content_deleted(&self, url: &str) -> StoreResult<Option<RuleId>> {
        let source = normalize(url);
        let exists = self
            .store
            .list_rules()?
            .iter()
            .any(|r| !r.is_regex && r.status == RedirectStatus::Gone && normalize(&r.source) == source);
        if exists {
            return Ok(None);
        }

        let draft = RuleDraft::gone(source.clone()).with_provenance(Provenance::Auto410);
        let id = self.store.save_rule(prepare_draft(draft)?, Utc::now())?;
        self.cache.invalidate();
        tracing::info!(rule_id = id, source = %source, "Created 410 rule for deleted content");
        Ok(Some(id))
    }
}

/// Non-blocking problems with a sanitized draft.
pub fn draft_warnings(draft: &RuleDraft) -> Vec<RuleWarning> {
    let id = draft.id.unwrap_or_default();
    let mut warnings = Vec::new();

    if draft.is_regex {
        if let Err(e) = compile_pattern(&draft.source) {
            warnings.push(RuleWarning {
                rule_id: id,
                source: draft.source.clone(),
                message: format!("pattern does not compile and will never match: {}", e),
            });
        }
    }
    for problem in condition_problems(&draft.conditions) {
        warnings.push(RuleWarning {
            rule_id: id,
            source: draft.source.clone(),
            message: format!("condition will never pass: {}", problem),
        });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::store::JsonRuleStore;
    use crate::rules::types::Condition;
    use std::time::Duration;

    fn manager() -> RuleManager {
        let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::in_memory());
        let cache = Arc::new(RuleCache::new(store.clone(), Duration::from_secs(3600)));
        RuleManager::new(store, cache)
    }

    #[test]
    fn test_save_invalidates_cache() {
        let m = manager();
        assert!(m.cache().get_active_rules().is_empty());
        assert!(m.cache().is_warm());

        m.save_rule(RuleDraft::new("/a", "/b")).unwrap();
        assert!(!m.cache().is_warm());
        assert_eq!(m.cache().get_active_rules().len(), 1);
    }

    #[test]
    fn test_save_reports_warnings() {
        let m = manager();
        let saved = m
            .save_rule(
                RuleDraft::regex("^/x/(.+$", "/y/$1")
                    .with_condition(Condition::new("moon_phase", "equals", "full")),
            )
            .unwrap();
        assert_eq!(saved.warnings.len(), 2);
        assert!(m.get_rule(saved.id).unwrap().is_some());
    }

    #[test]
    fn test_failed_save_does_not_invalidate() {
        let m = manager();
        m.cache().get_active_rules();
        assert!(m.save_rule(RuleDraft::new("", "/b")).is_err());
        assert!(m.cache().is_warm());
    }

    #[test]
    fn test_content_moved_creates_and_repoints() {
        let m = manager();
        let a = m.save_rule(RuleDraft::new("/legacy", "/post-old")).unwrap().id;

        let outcome = m.on_content_moved("https://example.com/Post-Old/", "/post-new").unwrap();
        assert!(outcome.created.is_some());
        assert_eq!(outcome.repointed, 1);
        assert_eq!(m.get_rule(a).unwrap().unwrap().target, "/post-new");

        let created = m.get_rule(outcome.created.unwrap()).unwrap().unwrap();
        assert_eq!(created.source, "/post-old");
        assert_eq!(created.provenance, Provenance::Auto);

        // Same URL after normalization: nothing happens.
        assert_eq!(m.on_content_moved("/x/", "/X").unwrap(), ContentMoved::default());
    }

    #[test]
    fn test_content_moved_is_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::open(dir.path().join("rules.json")).unwrap());
        let cache = Arc::new(RuleCache::new(store.clone(), Duration::from_secs(3600)));
        let m = RuleManager::new(store, cache);
        m.save_rule(RuleDraft::new("/legacy", "/post-old")).unwrap();
        assert_eq!(m.cache().get_active_rules().len(), 1);

        // Persisting fails once the directory is gone; neither the new rule nor
        // the repoint may land.
        std::fs::remove_dir_all(dir.path()).unwrap();
        assert!(m.on_content_moved("/post-old", "/post-new").is_err());

        let rules = m.list_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].target, "/post-old");
        assert_eq!(m.cache().get_active_rules().len(), 1);
    }

    #[test]
    fn test_content_deleted_is_idempotent() {
        let m = manager();
        let first = m.on_content_deleted("/gone-page").unwrap();
        assert!(first.is_some());
        assert!(m.on_content_deleted("/gone-page/").unwrap().is_none());

        let rule = m.get_rule(first.unwrap()).unwrap().unwrap();
        assert_eq!(rule.status, RedirectStatus::Gone);
        assert_eq!(rule.provenance, Provenance::Auto410);
    }
}
