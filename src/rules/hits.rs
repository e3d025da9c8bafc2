//! Rule usage tracking.
//!
//! # Responsibilities
//! - Count rule hits on the hot path without touching the store
//! - Periodically flush accumulated counts into the store
//!
//! # Design Decisions
//! - Counters live in a `DashMap` keyed by rule and UTC day; recording a hit
//!   is a shard-local update
//! - Flushing drains the map first; on a failed write the deltas are merged
//!   back so no hit is lost
//! - Usage counters are statistics: flushing does not invalidate the rule cache

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time;

use crate::rules::store::{RuleStore, StoreResult};
use crate::rules::types::{HitDelta, RuleId};

/// Pending hit counters, keyed by rule and day.
#[derive(Debug, Default)]
pub struct HitTracker {
    pending: DashMap<(RuleId, NaiveDate), (u64, DateTime<Utc>)>,
}

impl HitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: RuleId, at: DateTime<Utc>) {
        self.merge(id, at.date_naive(), 1, at);
    }

    fn merge(&self, id: RuleId, day: NaiveDate, count: u64, last_hit: DateTime<Utc>) {
        let mut entry = self.pending.entry((id, day)).or_insert((0, last_hit));
        entry.0 += count;
        if last_hit > entry.1 {
            entry.1 = last_hit;
        }
    }

    /// Number of (rule, day) counters pending.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take every pending counter.
    pub fn drain(&self) -> Vec<HitDelta> {
        let keys: Vec<(RuleId, NaiveDate)> = self.pending.iter().map(|e| *e.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .map(|((id, day), (count, last_hit))| HitDelta {
                id,
                day,
                count,
                last_hit,
            })
            .collect()
    }

    /// Write pending counters to the store. Returns how many counters were written.
    pub fn flush(&self, store: &dyn RuleStore) -> StoreResult<usize> {
        let deltas = self.drain();
        if deltas.is_empty() {
            return Ok(0);
        }

        if let Err(e) = store.record_hits(&deltas) {
            for delta in &deltas {
                self.merge(delta.id, delta.day, delta.count, delta.last_hit);
            }
            return Err(e);
        }
        Ok(deltas.len())
    }
}

/// Background task flushing a [`HitTracker`] on a fixed interval.
pub struct HitFlusher {
    tracker: Arc<HitTracker>,
    store: Arc<dyn RuleStore>,
    interval: Duration,
}

impl HitFlusher {
    pub fn new(tracker: Arc<HitTracker>, store: Arc<dyn RuleStore>, interval: Duration) -> Self {
        Self {
            tracker,
            store,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Hit flusher starting");

        let mut ticker = time::interval(self.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Hit flusher received shutdown signal, flushing and exiting");
                    self.flush_once();
                    break;
                }
            }
        }
    }

    fn flush_once(&self) {
        match self.tracker.flush(self.store.as_ref()) {
            Ok(0) => {}
            Ok(count) => tracing::debug!(rules = count, "Flushed rule hits"),
            Err(e) => tracing::warn!(error = %e, "Failed to flush rule hits, will retry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::store::JsonRuleStore;
    use crate::rules::types::RuleDraft;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_record_accumulates() {
        let tracker = HitTracker::new();
        let t0 = Utc::now();
        tracker.record(1, t0);
        tracker.record(1, t0 + ChronoDuration::seconds(5));
        tracker.record(2, t0);

        let mut deltas = tracker.drain();
        deltas.sort_by_key(|d| d.id);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].count, 2);
        assert_eq!(deltas[0].last_hit, t0 + ChronoDuration::seconds(5));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_flush_writes_to_store() {
        let store = JsonRuleStore::in_memory();
        let id = store.save_rule(RuleDraft::new("/a", "/b"), Utc::now()).unwrap();
        let tracker = HitTracker::new();
        let at = Utc::now();
        tracker.record(id, at);
        tracker.record(id, at);

        assert_eq!(tracker.flush(&store).unwrap(), 1);
        let rule = store.get_rule(id).unwrap().unwrap();
        assert_eq!(rule.hit_count, 2);
        assert_eq!(rule.last_hit, Some(at));
        assert_eq!(tracker.flush(&store).unwrap(), 0);
        assert_eq!(store.daily_hits(at.date_naive(), Some(id)).unwrap()[0].hits, 2);
    }

    #[test]
    fn test_hits_are_bucketed_by_day() {
        let tracker = HitTracker::new();
        let t0 = Utc::now();
        tracker.record(1, t0);
        tracker.record(1, t0 - ChronoDuration::days(1));
        tracker.record(1, t0);

        let mut deltas = tracker.drain();
        deltas.sort_by_key(|d| d.day);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].count, 1);
        assert_eq!(deltas[1].count, 2);
        assert_eq!(deltas[1].day, t0.date_naive());
    }

    #[tokio::test]
    async fn test_flusher_flushes_on_shutdown() {
        let store: Arc<JsonRuleStore> = Arc::new(JsonRuleStore::in_memory());
        let id = store.save_rule(RuleDraft::new("/a", "/b"), Utc::now()).unwrap();
        let tracker = Arc::new(HitTracker::new());
        tracker.record(id, Utc::now());

        let (tx, rx) = broadcast::channel(1);
        let flusher = HitFlusher::new(tracker.clone(), store.clone(), Duration::from_secs(3600));
        let handle = tokio::spawn(flusher.run(rx));
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(tracker.is_empty());
        assert_eq!(store.get_rule(id).unwrap().unwrap().hit_count, 1);
    }
}
