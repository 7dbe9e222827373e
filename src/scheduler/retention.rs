//! Retention manager for pruning old metric values.

use crate::db::Store;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Periodically deletes metric values older than the retention window.
pub struct RetentionManager {
    store: Arc<Store>,
    retention_days: i64,
    interval: Duration,
    stop: broadcast::Sender<()>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention_days: i64, interval: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            store,
            retention_days,
            interval,
            stop,
        }
    }

    /// Start the retention manager background task.
    ///
    /// The stop subscription exists before the task is spawned, so a `stop`
    /// issued right after `start` is never missed.
    pub fn start(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let retention_days = self.retention_days;
        let period = self.interval.max(Duration::from_secs(1));
        let mut rx = self.stop.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store, retention_days, Utc::now());
                    }
                }
            }
            tracing::info!("RetentionManager: stopped");
        })
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let _ = self.stop.send(());
    }
}

/// Run one cleanup pass. Returns rows deleted, zero on failure.
pub fn process_retention(store: &Store, retention_days: i64, now: DateTime<Utc>) -> usize {
    if retention_days <= 0 {
        return 0;
    }
    let cutoff = now - ChronoDuration::days(retention_days);

    match store.cleanup_expired(cutoff) {
        Ok(0) => 0,
        Ok(deleted) => {
            tracing::info!("RetentionManager: deleted {} metric values older than {}", deleted, cutoff);
            deleted
        }
        Err(e) => {
            tracing::error!("RetentionManager: failed to delete expired metric values: {}", e);
            0
        }
    }
}
