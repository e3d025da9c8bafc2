//! Active rule cache.
//!
//! # Responsibilities
//! - Hold the compiled active rule set with a time-to-live
//! - Rebuild lazily from the store on the first read after expiry or invalidation
//! - Fail open: a store failure yields an empty set for that read
//!
//! # Design Decisions
//! - Readers load an `Arc` snapshot via `arc-swap`; they never block each other
//!   or a writer
//! - `invalidate` bumps a generation counter; a snapshot built before the bump is
//!   never served afterwards, even if its rebuild finishes late
//! - Empty fallback sets are not cached, so the next read retries the store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use chrono::Utc;

use crate::observability::metrics;
use crate::routing::matcher::RuleSet;
use crate::rules::store::RuleStore;

struct Snapshot {
    rules: Arc<RuleSet>,
    loaded_at: Instant,
    generation: u64,
}

/// Read-mostly, invalidate-on-write view of the active rules.
pub struct RuleCache {
    store: Arc<dyn RuleStore>,
    ttl_millis: AtomicU64,
    generation: AtomicU64,
    snapshot: ArcSwapOption<Snapshot>,
}

impl RuleCache {
    pub fn new(store: Arc<dyn RuleStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl_millis: AtomicU64::new(ttl.as_millis() as u64),
            generation: AtomicU64::new(0),
            snapshot: ArcSwapOption::empty(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis.load(Ordering::Relaxed))
    }

    /// Change the TTL (config reload). Takes effect on the next read.
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_millis
            .store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    /// The active rule set, exact rules first, ascending id within each group.
    pub fn get_active_rules(&self) -> Arc<RuleSet> {
        let generation = self.generation.load(Ordering::Acquire);

        if let Some(snapshot) = self.snapshot.load_full() {
            if snapshot.generation == generation && snapshot.loaded_at.elapsed() < self.ttl() {
                return snapshot.rules.clone();
            }
        }

        self.rebuild(generation)
    }

    /// Drop the cached set; the next read reloads from the store.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.snapshot.store(None);
        tracing::debug!("Rule cache invalidated");
    }

    /// Whether a snapshot is currently cached.
    pub fn is_warm(&self) -> bool {
        self.snapshot
            .load()
            .as_ref()
            .is_some_and(|s| s.generation == self.generation.load(Ordering::Acquire))
    }

    fn rebuild(&self, generation: u64) -> Arc<RuleSet> {
        let rules = match self.store.load_active_rules(Utc::now()) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load active rules, serving without redirects");
                metrics::record_cache_load_failure();
                return Arc::new(RuleSet::empty());
            }
        };

        let set = Arc::new(RuleSet::compile(rules));
        metrics::record_cache_rebuild(set.len());
        tracing::debug!(rules = set.len(), warnings = set.warnings().len(), "Rule cache rebuilt");

        self.snapshot.store(Some(Arc::new(Snapshot {
            rules: set.clone(),
            loaded_at: Instant::now(),
            generation,
        })));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::store::{JsonRuleStore, StoreError, StoreResult};
    use crate::rules::types::{DailyHits, HitDelta, Rule, RuleDraft, RuleId, RuleMutation};
    use chrono::{DateTime, NaiveDate};
    use std::sync::atomic::AtomicBool;

    /// Wraps a store, counting loads and optionally failing them.
    #[derive(Default)]
    struct CountingStore {
        inner: JsonRuleStore,
        loads: AtomicU64,
        fail: AtomicBool,
    }

    impl RuleStore for CountingStore {
        fn load_active_rules(&self, now: DateTime<Utc>) -> StoreResult<Vec<Rule>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Invalid("backend down".into()));
            }
            self.inner.load_active_rules(now)
        }
        fn list_rules(&self) -> StoreResult<Vec<Rule>> {
            self.inner.list_rules()
        }
        fn get_rule(&self, id: RuleId) -> StoreResult<Option<Rule>> {
            self.inner.get_rule(id)
        }
        fn save_rule(&self, draft: RuleDraft, now: DateTime<Utc>) -> StoreResult<RuleId> {
            self.inner.save_rule(draft, now)
        }
        fn delete_rule(&self, id: RuleId) -> StoreResult<bool> {
            self.inner.delete_rule(id)
        }
        fn apply_batch(&self, mutations: &[RuleMutation], now: DateTime<Utc>) -> StoreResult<Vec<RuleId>> {
            self.inner.apply_batch(mutations, now)
        }
        fn insert_with_batch(
            &self,
            draft: RuleDraft,
            mutations: &[RuleMutation],
            now: DateTime<Utc>,
        ) -> StoreResult<(RuleId, usize)> {
            self.inner.insert_with_batch(draft, mutations, now)
        }
        fn record_hits(&self, hits: &[HitDelta]) -> StoreResult<()> {
            self.inner.record_hits(hits)
        }
        fn daily_hits(&self, since: NaiveDate, rule: Option<RuleId>) -> StoreResult<Vec<DailyHits>> {
            self.inner.daily_hits(since, rule)
        }
    }

    fn setup(ttl: Duration) -> (Arc<CountingStore>, RuleCache) {
        let store = Arc::new(CountingStore::default());
        store.save_rule(RuleDraft::new("/a", "/b"), Utc::now()).unwrap();
        let cache = RuleCache::new(store.clone(), ttl);
        (store, cache)
    }

    #[test]
    fn test_reads_are_served_from_cache() {
        let (store, cache) = setup(Duration::from_secs(60));
        assert_eq!(cache.get_active_rules().len(), 1);
        assert_eq!(cache.get_active_rules().len(), 1);
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert!(cache.is_warm());
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let (store, cache) = setup(Duration::from_secs(60));
        cache.get_active_rules();

        store.save_rule(RuleDraft::new("/c", "/d"), Utc::now()).unwrap();
        assert_eq!(cache.get_active_rules().len(), 1, "stale read within TTL");

        cache.invalidate();
        assert!(!cache.is_warm());
        assert_eq!(cache.get_active_rules().len(), 2);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_ttl_always_reloads() {
        let (store, cache) = setup(Duration::ZERO);
        cache.get_active_rules();
        cache.get_active_rules();
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_load_failure_fails_open_and_is_not_cached() {
        let (store, cache) = setup(Duration::from_secs(60));
        store.fail.store(true, Ordering::SeqCst);
        assert!(cache.get_active_rules().is_empty());
        assert!(!cache.is_warm());

        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_active_rules().len(), 1);
    }
}
