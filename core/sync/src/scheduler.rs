//! Sync scheduling - change-triggered and periodic modes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tasksync_common::Error;
use tasksync_store::{StoreEvent, Subscription, WriteOrigin};

use crate::engine::SyncEngine;

/// Shortest accepted periodic interval.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Sync mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Reconcile only when triggered explicitly.
    Manual,
    /// Reconcile after every local write.
    OnChange,
    /// Reconcile at regular intervals.
    Periodic { interval: Duration },
    /// Both on local writes and at regular intervals.
    Hybrid { interval: Duration },
}

impl SyncMode {
    /// Periodic interval, if the mode has one.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncMode::Periodic { interval } | SyncMode::Hybrid { interval } => {
                Some((*interval).max(MIN_INTERVAL))
            }
            _ => None,
        }
    }

    /// Whether local writes trigger a pass.
    pub fn triggers_on_change(&self) -> bool {
        matches!(self, SyncMode::OnChange | SyncMode::Hybrid { .. })
    }
}

/// Background driver running reconciliation passes for an engine.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Start driving `engine` on the current tokio runtime.
    ///
    /// Periodic modes run a first pass immediately. Only writes made through
    /// the mutation API trigger a pass; reconciliation's own writes do not.
    pub fn spawn(engine: SyncEngine, mode: SyncMode) -> SchedulerHandle {
        let trigger = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let subscription = mode.triggers_on_change().then(|| {
            let trigger = trigger.clone();
            engine.store().subscribe(Arc::new(move |event: &StoreEvent| {
                if event.origin == WriteOrigin::Local {
                    trigger.notify_one();
                }
            }))
        });

        let task = tokio::spawn(run(engine.clone(), mode, trigger.clone(), cancel.clone()));

        SchedulerHandle {
            engine,
            trigger,
            cancel,
            task: Some(task),
            _subscription: subscription,
        }
    }
}

async fn run(engine: SyncEngine, mode: SyncMode, trigger: Arc<Notify>, cancel: CancellationToken) {
    let mut ticker = mode.interval().map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    info!("Sync scheduler started ({:?})", mode);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = trigger.notified() => debug!("Reconciliation triggered"),
            _ = wait_for_tick(&mut ticker) => debug!("Periodic reconciliation"),
        }

        run_pass(&engine).await;
    }

    info!("Sync scheduler stopped");
}

async fn wait_for_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_pass(engine: &SyncEngine) {
    match engine.reconcile().await {
        Ok(report) if report.coalesced => {}
        Ok(report) => {
            if let Some(summary) = report.error_summary() {
                warn!("Reconciliation finished with problems: {}", summary);
            }
        }
        Err(Error::NotAuthenticated) => debug!("Signed out; skipping reconciliation"),
        Err(e) => error!("Reconciliation failed: {}", e),
    }
}

/// Handle for a running scheduler.
///
/// Dropping the handle stops the scheduler without waiting.
pub struct SchedulerHandle {
    engine: SyncEngine,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    _subscription: Option<Subscription>,
}

impl SchedulerHandle {
    /// Request a pass. Requests made while a pass runs collapse into one.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Whether the scheduler loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop scheduling passes.
    ///
    /// # Postconditions
    /// - No further pass starts
    /// - A pass in progress and all background pushes have finished or
    ///   timed out
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Sync scheduler task failed: {}", e);
            }
        }
        self.engine.flush().await;
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::engine::SyncConfig;
    use tasksync_common::{OwnerId, SyncState};
    use tasksync_remote::{MemoryRemote, RetryConfig};
    use tasksync_store::{MemoryRecordStore, RecordStore};

    fn engine(remote: Arc<MemoryRemote>) -> (SyncEngine, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let auth = Arc::new(StaticAuth::signed_in(OwnerId::new("alice").unwrap()));
        let config = SyncConfig {
            sync_mode: SyncMode::Manual,
            retry: RetryConfig::new(0),
            ..SyncConfig::default()
        };
        (SyncEngine::new(store.clone(), remote, auth, config), store)
    }

    #[test]
    fn test_mode_properties() {
        assert_eq!(SyncMode::Manual.interval(), None);
        assert!(!SyncMode::Manual.triggers_on_change());
        assert!(SyncMode::OnChange.triggers_on_change());

        let periodic = SyncMode::Periodic {
            interval: Duration::from_secs(60),
        };
        assert_eq!(periodic.interval(), Some(Duration::from_secs(60)));
        assert!(!periodic.triggers_on_change());

        let hybrid = SyncMode::Hybrid {
            interval: Duration::ZERO,
        };
        assert_eq!(hybrid.interval(), Some(MIN_INTERVAL));
        assert!(hybrid.triggers_on_change());
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, _store) = engine(remote.clone());
        let handle = SyncScheduler::spawn(engine, SyncMode::Manual);
        assert!(handle.is_running());

        handle.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.calls().lists, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_local_write_triggers_pass() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, store) = engine(remote.clone());
        let handle = SyncScheduler::spawn(engine.clone(), SyncMode::OnChange);

        remote.set_online(false);
        let task = engine.create_task("Triggered", None).unwrap();
        engine.flush().await;
        remote.set_online(true);

        // Failure bookkeeping is a sync-origin write and must not retrigger.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let record = store.get(&task.local_id).unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);

        let lists = remote.calls().lists;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.calls().lists, lists);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_passes() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, _store) = engine(remote.clone());
        let handle = SyncScheduler::spawn(
            engine,
            SyncMode::Periodic {
                interval: Duration::from_secs(30),
            },
        );

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(remote.calls().lists, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.calls().lists, 2);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(remote.calls().lists, 2);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_background_pushes() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Some(Duration::from_millis(30)));
        let (engine, store) = engine(remote.clone());
        let handle = SyncScheduler::spawn(engine.clone(), SyncMode::Manual);

        let task = engine.create_task("Before shutdown", None).unwrap();
        handle.shutdown().await;

        let record = store.get(&task.local_id).unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_drop_stops_scheduler() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, _store) = engine(remote.clone());
        let handle = SyncScheduler::spawn(
            engine,
            SyncMode::Periodic {
                interval: Duration::from_secs(30),
            },
        );
        drop(handle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(remote.calls().lists, 0);
    }
}
