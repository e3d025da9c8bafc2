//! Periodic retention sweep of the 404 log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time;

use crate::notfound::log::NotFoundLog;

pub struct NotFoundSweeper {
    log: Arc<NotFoundLog>,
    interval: Duration,
}

impl NotFoundSweeper {
    pub fn new(log: Arc<NotFoundLog>, interval: Duration) -> Self {
        Self { log, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "404 log sweeper starting");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.log.sweep(Utc::now());
                    if removed > 0 {
                        tracing::info!(removed, "Swept expired 404 log entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("404 log sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
