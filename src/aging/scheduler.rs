//! Periodic aging runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::aging::cleanup::AgingEngine;

pub struct AgingScheduler {
    engine: Arc<AgingEngine>,
    interval: Duration,
}

impl AgingScheduler {
    pub fn new(engine: Arc<AgingEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Run the engine every `interval` until shutdown. The first run happens one
    /// full interval after startup. Disabled settings skip the run but keep the
    /// loop alive so a reload can turn aging back on.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Aging scheduler starting");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Aging scheduler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn tick(&self) {
        if !self.engine.settings().enabled {
            tracing::debug!("Aging disabled, skipping run");
            return;
        }
        if let Err(e) = self.engine.run() {
            tracing::error!(error = %e, "Aging cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aging::cleanup::AgingSettings;
    use crate::rules::cache::RuleCache;
    use crate::rules::manager::RuleManager;
    use crate::rules::store::{JsonRuleStore, RuleStore};

    #[tokio::test]
    async fn test_scheduler_exits_on_shutdown() {
        let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::in_memory());
        let cache = Arc::new(RuleCache::new(store.clone(), Duration::from_secs(60)));
        let engine = Arc::new(AgingEngine::new(RuleManager::new(store, cache), AgingSettings::default()));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(AgingScheduler::new(engine, Duration::from_secs(3600)).run(rx));
        tx.send(()).unwrap();

        time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_after_interval() {
        let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::in_memory());
        let cache = Arc::new(RuleCache::new(store.clone(), Duration::from_secs(60)));
        let engine = Arc::new(AgingEngine::new(RuleManager::new(store, cache), AgingSettings::default()));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(AgingScheduler::new(engine.clone(), Duration::from_secs(10)).run(rx));

        time::sleep(Duration::from_secs(11)).await;
        assert!(engine.last_report().is_some());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
