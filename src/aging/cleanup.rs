//! Applying the aging policy.
//!
//! # Responsibilities
//! - Turn candidates into one batch of mutations
//! - Write the batch through the rule manager (one cache invalidation)
//! - Keep the last run's report for the admin API
//!
//! # Design Decisions
//! - Candidates are selected from a snapshot; the store is only locked for the
//!   batch write
//! - Reports carry at most [`REPORT_SAMPLE_LIMIT`] items, all of them rules
//!   the batch actually changed

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aging::policy::{select_candidates, AgingPolicy, CleanupAction};
use crate::observability::metrics;
use crate::rules::manager::RuleManager;
use crate::rules::store::StoreResult;
use crate::rules::types::{Rule, RuleId, RuleMutation};

pub const REPORT_SAMPLE_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupItem {
    pub id: RuleId,
    pub source: String,
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub count: usize,
    pub action: CleanupAction,
    pub date: DateTime<Utc>,
    pub items: Vec<CleanupItem>,
}

/// Mutations retiring `candidates` with `action`.
pub fn plan_cleanup(candidates: &[Rule], action: CleanupAction, now: DateTime<Utc>) -> Vec<RuleMutation> {
    let date = now.format("%Y-%m-%d %H:%M:%S");
    candidates
        .iter()
        .map(|rule| match action {
            CleanupAction::Deactivate => RuleMutation::Deactivate {
                id: rule.id,
                note: format!("Auto-cleanup: deactivated on {}", date),
            },
            CleanupAction::Delete => RuleMutation::Delete { id: rule.id },
            CleanupAction::ConvertTo410 => RuleMutation::ConvertToGone {
                id: rule.id,
                note: format!("Auto-cleanup: converted to 410 on {}", date),
            },
        })
        .collect()
}

/// Retire `candidates` in a single batch.
pub fn apply(manager: &RuleManager, candidates: &[Rule], action: CleanupAction) -> StoreResult<CleanupReport> {
    let now = Utc::now();
    let mutations = plan_cleanup(candidates, action, now);
    let applied: HashSet<RuleId> = manager.apply_batch(&mutations)?.into_iter().collect();

    metrics::record_aging_affected(action.as_str(), applied.len());
    Ok(CleanupReport {
        count: applied.len(),
        action,
        date: now,
        items: candidates
            .iter()
            .filter(|r| applied.contains(&r.id))
            .take(REPORT_SAMPLE_LIMIT)
            .map(|r| CleanupItem {
                id: r.id,
                source: r.source.clone(),
            })
            .collect(),
    })
}

/// Runtime aging settings, replaceable on config reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgingSettings {
    pub enabled: bool,
    pub policy: AgingPolicy,
    pub action: CleanupAction,
}

impl Default for AgingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: AgingPolicy::default(),
            action: CleanupAction::Deactivate,
        }
    }
}

/// Selection + application against the live store, with the last report kept.
pub struct AgingEngine {
    manager: RuleManager,
    settings: ArcSwap<AgingSettings>,
    last_report: RwLock<Option<CleanupReport>>,
}

impl AgingEngine {
    pub fn new(manager: RuleManager, settings: AgingSettings) -> Self {
        Self {
            manager,
            settings: ArcSwap::from_pointee(settings),
            last_report: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> Arc<AgingSettings> {
        self.settings.load_full()
    }

    pub fn set_settings(&self, settings: AgingSettings) {
        self.settings.store(Arc::new(settings));
    }

    /// Rules the current policy would retire.
    pub fn candidates(&self) -> StoreResult<Vec<Rule>> {
        let rules = self.manager.store().list_rules()?;
        Ok(select_candidates(&rules, &self.settings().policy, Utc::now()))
    }

    /// Select and retire with the configured action.
    pub fn run(&self) -> StoreResult<CleanupReport> {
        self.run_with(self.settings().action)
    }

    /// Select and retire with an explicit action.
    pub fn run_with(&self, action: CleanupAction) -> StoreResult<CleanupReport> {
        let candidates = self.candidates()?;
        let report = apply(&self.manager, &candidates, action)?;

        tracing::info!(count = report.count, action = %report.action, "Aging cleanup completed");
        if let Ok(mut last) = self.last_report.write() {
            *last = Some(report.clone());
        }
        Ok(report)
    }

    pub fn last_report(&self) -> Option<CleanupReport> {
        self.last_report.read().ok().and_then(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::cache::RuleCache;
    use crate::rules::store::{JsonRuleStore, RuleStore};
    use crate::rules::types::{Provenance, RedirectStatus, RuleDraft};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    /// Manager over a store holding one stale rule, one stale manual rule and one fresh rule.
    fn seeded() -> (RuleManager, RuleId) {
        let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::in_memory());
        let old = Utc::now() - ChronoDuration::days(400);
        let stale = store
            .save_rule(RuleDraft::new("/stale", "/x").with_provenance(Provenance::Import), old)
            .unwrap();
        store.save_rule(RuleDraft::new("/kept", "/x"), old).unwrap();
        store
            .save_rule(RuleDraft::new("/fresh", "/x").with_provenance(Provenance::Import), Utc::now())
            .unwrap();

        let cache = Arc::new(RuleCache::new(store.clone(), Duration::from_secs(3600)));
        (RuleManager::new(store, cache), stale)
    }

    #[test]
    fn test_deactivate_appends_note() {
        let (manager, stale) = seeded();
        let engine = AgingEngine::new(manager.clone(), AgingSettings::default());

        let report = engine.run().unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.items, vec![CleanupItem { id: stale, source: "/stale".into() }]);

        let rule = manager.get_rule(stale).unwrap().unwrap();
        assert!(!rule.is_active);
        assert!(rule.note.starts_with("Auto-cleanup: deactivated on "));
        assert_eq!(engine.last_report(), Some(report));

        // Already inactive: nothing left to select.
        assert_eq!(engine.run().unwrap().count, 0);
    }

    #[test]
    fn test_convert_to_410() {
        let (manager, stale) = seeded();
        let engine = AgingEngine::new(manager.clone(), AgingSettings::default());
        engine.run_with(CleanupAction::ConvertTo410).unwrap();

        let rule = manager.get_rule(stale).unwrap().unwrap();
        assert_eq!(rule.status, RedirectStatus::Gone);
        assert!(rule.target.is_empty());
        assert_eq!(rule.provenance, Provenance::Auto410);
        assert!(rule.is_active);
    }

    #[test]
    fn test_delete() {
        let (manager, stale) = seeded();
        let engine = AgingEngine::new(manager.clone(), AgingSettings::default());
        assert_eq!(engine.run_with(CleanupAction::Delete).unwrap().count, 1);
        assert!(manager.get_rule(stale).unwrap().is_none());
        assert_eq!(manager.list_rules().unwrap().len(), 2);
    }

    #[test]
    fn test_report_sample_is_bounded() {
        let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::in_memory());
        let old = Utc::now() - ChronoDuration::days(400);
        for i in 0..150 {
            store
                .save_rule(RuleDraft::new(format!("/r{}", i), "/t").with_provenance(Provenance::Import), old)
                .unwrap();
        }
        let cache = Arc::new(RuleCache::new(store.clone(), Duration::from_secs(1)));
        let engine = AgingEngine::new(RuleManager::new(store, cache), AgingSettings::default());

        let report = engine.run_with(CleanupAction::Delete).unwrap();
        assert_eq!(report.count, 150);
        assert_eq!(report.items.len(), REPORT_SAMPLE_LIMIT);
    }

    #[test]
    fn test_report_lists_only_applied_rules() {
        let (manager, stale) = seeded();
        let mut candidates = manager.list_rules().unwrap();
        candidates.retain(|r| r.id == stale);
        let mut vanished = candidates[0].clone();
        vanished.id = 999;
        candidates.push(vanished);

        let report = apply(&manager, &candidates, CleanupAction::Deactivate).unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.items, vec![CleanupItem { id: stale, source: "/stale".into() }]);
    }
}
