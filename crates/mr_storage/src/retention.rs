use chrono::{DateTime, Utc};
use mr_core::{ReportStorage, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Periodically deletes reports whose retention window has passed.
///
/// The scheduler only talks to the storage trait object; it holds no lock a
/// request path could wait on.
pub struct RetentionScheduler {
    storage: Arc<dyn ReportStorage>,
    interval: Duration,
    vacuum: bool,
}

impl RetentionScheduler {
    pub fn new(storage: Arc<dyn ReportStorage>, interval: Duration) -> Self {
        Self {
            storage,
            interval,
            vacuum: false,
        }
    }

    /// Compact the store after a sweep that deleted something
    pub fn with_vacuum(mut self, vacuum: bool) -> Self {
        self.vacuum = vacuum;
        self
    }

    /// Run one retention sweep. Fails only when the expired set cannot be
    /// listed; individual delete failures are counted and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let expired = self.storage.list_expired(now).await?;
        let mut outcome = SweepOutcome {
            expired: expired.len(),
            ..SweepOutcome::default()
        };

        for id in &expired {
            match self.storage.delete_report(id).await {
                Ok(()) => outcome.deleted += 1,
                Err(e) => {
                    warn!("⚠️ Failed to delete expired report {}: {}", id, e);
                    outcome.failed += 1;
                }
            }
        }

        if self.vacuum && outcome.deleted > 0 {
            if let Err(e) = self.storage.compact().await {
                warn!("⚠️ Failed to compact storage after purge: {}", e);
            }
        }
        Ok(outcome)
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(self) -> RetentionHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!("🧹 Retention task started (every {}s)", self.interval.as_secs());
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep(Utc::now()).await {
                            Ok(outcome) if outcome.expired > 0 => info!(
                                "🧹 Purged {}/{} expired reports ({} failed)",
                                outcome.deleted, outcome.expired, outcome.failed
                            ),
                            Ok(_) => debug!("🧹 No expired reports"),
                            Err(e) => warn!("⚠️ Retention sweep failed, retrying next interval: {}", e),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("🧹 Retention task stopped");
        });

        RetentionHandle { shutdown, task }
    }
}

pub struct RetentionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop and wait for it to exit; a sweep in progress finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("⚠️ Retention task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::report_expiring_at;
    use crate::MemoryStorage;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use mr_core::{Error, Report};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps memory storage with failure switches and call counters.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_listing: bool,
        fail_delete_id: Option<&'static str>,
        list_calls: AtomicUsize,
        compact_calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportStorage for FlakyStorage {
        async fn create_report(&self, report: &Report) -> Result<String> {
            self.inner.create_report(report).await
        }

        async fn get_report(&self, id: &str) -> Result<Report> {
            self.inner.get_report(id).await
        }

        async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing {
                return Err(Error::Storage("database is locked".to_string()));
            }
            self.inner.list_expired(now).await
        }

        async fn delete_report(&self, id: &str) -> Result<()> {
            if self.fail_delete_id == Some(id) {
                return Err(Error::Storage("disk I/O error".to_string()));
            }
            self.inner.delete_report(id).await
        }

        async fn compact(&self) -> Result<()> {
            self.compact_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn seeded(storage: &dyn ReportStorage, now: DateTime<Utc>) {
        for (id, offset) in [("gone-1", -3), ("gone-2", -1), ("kept-1", 1), ("kept-2", 5)] {
            storage
                .create_report(&report_expiring_at(id, now + ChronoDuration::days(offset)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_sweep_deletes_exactly_expired() {
        let now = Utc::now();
        let storage = Arc::new(MemoryStorage::new());
        seeded(storage.as_ref(), now).await;

        let scheduler = RetentionScheduler::new(storage.clone(), Duration::from_secs(3600));
        let outcome = scheduler.sweep(now).await.unwrap();
        assert_eq!(outcome, SweepOutcome { expired: 2, deleted: 2, failed: 0 });

        assert!(storage.get_report("gone-1").await.is_err());
        assert!(storage.get_report("gone-2").await.is_err());
        assert!(storage.get_report("kept-1").await.is_ok());
        assert!(storage.get_report("kept-2").await.is_ok());

        // second run has nothing to do
        let outcome = scheduler.sweep(now).await.unwrap();
        assert_eq!(outcome, SweepOutcome::default());
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_delete_failure() {
        let now = Utc::now();
        let storage = Arc::new(FlakyStorage {
            fail_delete_id: Some("gone-1"),
            ..FlakyStorage::default()
        });
        seeded(storage.as_ref(), now).await;

        let scheduler = RetentionScheduler::new(storage.clone(), Duration::from_secs(3600))
            .with_vacuum(true);
        let outcome = scheduler.sweep(now).await.unwrap();
        assert_eq!(outcome, SweepOutcome { expired: 2, deleted: 1, failed: 1 });
        assert!(storage.get_report("gone-2").await.is_err());
        assert_eq!(storage.compact_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_vacuum_only_after_deletes() {
        let storage = Arc::new(FlakyStorage::default());
        let scheduler = RetentionScheduler::new(storage.clone(), Duration::from_secs(3600))
            .with_vacuum(true);
        scheduler.sweep(Utc::now()).await.unwrap();
        assert_eq!(storage.compact_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_background_task_purges_and_stops() {
        let now = Utc::now();
        let storage = Arc::new(MemoryStorage::new());
        seeded(storage.as_ref(), now).await;

        let handle = RetentionScheduler::new(storage.clone(), Duration::from_millis(20)).start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.is_running());
        assert_eq!(storage.len().await, 2);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_listing_failure_is_retried() {
        let storage = Arc::new(FlakyStorage {
            fail_listing: true,
            ..FlakyStorage::default()
        });

        let scheduler = RetentionScheduler::new(storage.clone(), Duration::from_millis(20));
        assert!(scheduler.sweep(Utc::now()).await.is_err());

        let handle = RetentionScheduler::new(storage.clone(), Duration::from_millis(20)).start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.is_running());
        handle.stop().await;
        assert!(storage.list_calls.load(Ordering::SeqCst) >= 3);
    }
}
