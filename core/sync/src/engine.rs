//! Core sync engine that orchestrates local-first mutations and reconciliation.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use tasksync_common::{
    time, Error, LocalId, OwnerId, Result, SyncState, TaskPatch, TaskRecord, Timestamp,
};
use tasksync_remote::{RemoteAck, RemoteRecord, RemoteStore, RetryConfig, RetryingRemote};
use tasksync_store::{RecordStore, StoreTxn, WriteOrigin};

use crate::auth::Authenticator;
use crate::conflict::{self, Resolution};
use crate::feed::TaskFeed;
use crate::scheduler::SyncMode;
use crate::state::{PushFailure, ReconcileReport, SyncStatus};

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When the scheduler runs reconciliation passes.
    pub sync_mode: SyncMode,
    /// Maximum concurrent remote pushes within one pass.
    pub push_concurrency: usize,
    /// Permanent faults after which a payload is no longer resent.
    pub max_permanent_failures: u32,
    /// Per-call timeout and in-call retries of transient faults.
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Hybrid {
                interval: Duration::from_secs(30),
            },
            push_concurrency: 4,
            max_permanent_failures: 5,
            retry: RetryConfig::default(),
        }
    }
}

/// Result of pushing one pending record.
#[derive(Debug)]
enum PushOutcome {
    Pushed,
    Deleted,
    /// Already synced, gone, or being pushed by someone else.
    Skipped,
    Stalled,
    Failed(PushFailure),
}

/// Result of merging one pulled document.
enum MergeOutcome {
    Created,
    Updated,
    Skipped,
}

/// Membership in a shared set for as long as the guard lives.
struct SetGuard<'a, T: Eq + Hash + Clone> {
    set: &'a Mutex<HashSet<T>>,
    key: T,
}

impl<'a, T: Eq + Hash + Clone> SetGuard<'a, T> {
    /// Insert `key`, or return `None` if it is already present.
    fn acquire(set: &'a Mutex<HashSet<T>>, key: &T) -> Option<Self> {
        if !lock(set).insert(key.clone()) {
            return None;
        }
        Some(Self {
            set,
            key: key.clone(),
        })
    }
}

impl<T: Eq + Hash + Clone> Drop for SetGuard<'_, T> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EngineInner {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn Authenticator>,
    config: SyncConfig,
    /// Records with a remote call in flight.
    in_flight: Mutex<HashSet<LocalId>>,
    /// Owners with a reconciliation pass running.
    reconciling: Mutex<HashSet<OwnerId>>,
    /// Permanent faults from background pushes, reported by the next pass.
    deferred: Mutex<HashMap<OwnerId, Vec<PushFailure>>>,
    status: watch::Sender<SyncStatus>,
    background: TaskTracker,
}

/// Sync engine keeping a local record store and a remote store converged.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create a new sync engine.
    ///
    /// The remote is wrapped with the configured timeout and retry policy.
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn Authenticator>,
        config: SyncConfig,
    ) -> Self {
        let remote: Arc<dyn RemoteStore> =
            Arc::new(RetryingRemote::new(remote, config.retry.clone()));
        let (status, _) = watch::channel(SyncStatus::default());

        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                auth,
                config,
                in_flight: Mutex::new(HashSet::new()),
                reconciling: Mutex::new(HashSet::new()),
                deferred: Mutex::new(HashMap::new()),
                status,
                background: TaskTracker::new(),
            }),
        }
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The local record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    /// The signed-in owner.
    ///
    /// # Errors
    /// - `NotAuthenticated` when signed out
    pub fn owner(&self) -> Result<OwnerId> {
        self.inner.auth.require_owner()
    }

    /// Create a task locally and push it in the background.
    ///
    /// # Postconditions
    /// - The returned record is durable with `sync_state = PendingPush`
    ///
    /// # Errors
    /// - `NotAuthenticated` when signed out
    /// - `Store` if the local write fails
    pub fn create_task(
        &self,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Result<TaskRecord> {
        let owner = self.owner()?;
        let record = TaskRecord::new_local(owner, title, description);
        self.inner.store.put(&record)?;

        debug!("Created task {}", record.local_id);
        self.spawn_push(record.local_id.clone());
        Ok(record)
    }

    /// Apply field changes locally; push in the background if the task was
    /// pushed before.
    ///
    /// # Errors
    /// - `NotAuthenticated` when signed out
    /// - `NotFound` if the task does not exist, belongs to another owner,
    ///   or is pending deletion
    /// - `Store` if the local write fails
    pub fn update_task(&self, local_id: &LocalId, patch: TaskPatch) -> Result<TaskRecord> {
        let record = self.edit(local_id, |record| record.apply_patch(&patch))?;
        if record.remote_id.is_some() {
            self.spawn_push(record.local_id.clone());
        }
        Ok(record)
    }

    /// Flip `is_completed`.
    ///
    /// # Errors
    /// - As [`SyncEngine::update_task`]
    pub fn toggle_completion(&self, local_id: &LocalId) -> Result<TaskRecord> {
        let record = self.edit(local_id, |record| {
            let patch = TaskPatch::completed(!record.is_completed);
            record.apply_patch(&patch);
        })?;
        if record.remote_id.is_some() {
            self.spawn_push(record.local_id.clone());
        }
        Ok(record)
    }

    /// Delete a task.
    ///
    /// A task that was never pushed is removed at once. Otherwise it becomes
    /// `PendingDelete`, disappears from listings, and is removed once the
    /// remote deletion is confirmed.
    ///
    /// # Errors
    /// - `NotAuthenticated` when signed out
    /// - `NotFound` if the task does not exist or belongs to another owner
    /// - `Store` if the local write fails
    pub fn delete_task(&self, local_id: &LocalId) -> Result<()> {
        let owner = self.owner()?;
        let mut needs_remote = false;

        self.inner
            .store
            .transaction(WriteOrigin::Local, &mut |txn| {
                let mut record = owned_record(txn, local_id, &owner)?;
                needs_remote = record.remote_id.is_some();
                if !needs_remote {
                    txn.delete(local_id)?;
                } else if record.sync_state != SyncState::PendingDelete {
                    record.mark_pending_delete();
                    txn.put(&record)?;
                }
                Ok(())
            })?;

        if needs_remote {
            debug!("Task {} marked for deletion", local_id);
            self.spawn_push(local_id.clone());
        } else {
            debug!("Task {} deleted locally", local_id);
        }
        Ok(())
    }

    /// Visible tasks of the signed-in owner, newest first.
    pub fn tasks(&self) -> Result<Vec<TaskRecord>> {
        let owner = self.owner()?;
        self.inner.store.visible_by_owner(&owner)
    }

    /// Reactive listing of the signed-in owner's visible tasks.
    pub fn feed(&self) -> Result<TaskFeed> {
        let owner = self.owner()?;
        TaskFeed::new(self.inner.store.clone(), owner)
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Wait for every background push spawned by a mutation to finish.
    pub async fn flush(&self) {
        let background = &self.inner.background;
        background.close();
        background.wait().await;
        background.reopen();
    }

    /// Run one reconciliation pass for the signed-in owner: push every
    /// pending record, then pull remote changes past the local high-water
    /// mark.
    ///
    /// A pass requested while another runs for the same owner returns at
    /// once with `coalesced = true`.
    ///
    /// # Errors
    /// - `NotAuthenticated` when signed out
    /// - `Store` if the local store cannot be read or written
    ///
    /// Remote faults never fail the pass; they are reported in the summary.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let owner = self.owner()?;
        let Some(_pass) = SetGuard::acquire(&self.inner.reconciling, &owner) else {
            debug!("Reconciliation for {} already running; coalesced", owner);
            return Ok(ReconcileReport::coalesced());
        };

        let start = Instant::now();
        info!("Starting reconciliation for {}", owner);
        self.inner.status.send_modify(|status| status.is_loading = true);

        let result = self.run_pass(&owner).await;
        let failed_records = self.count_failed(&owner);

        match &result {
            Ok(report) => {
                info!(
                    "Reconciliation completed in {:?}: {} pushed, {} deleted, {} pulled, {} updated, {} failed",
                    start.elapsed(),
                    report.pushed,
                    report.deleted,
                    report.pulled_created,
                    report.pulled_updated,
                    report.failures.len()
                );
                self.inner.status.send_modify(|status| {
                    status.is_loading = false;
                    status.last_error = report.error_summary();
                    status.failed_records = failed_records;
                    status.last_reconciled_at = Some(time::now());
                });
            }
            Err(e) => {
                warn!("Reconciliation failed: {}", e);
                self.inner.status.send_modify(|status| {
                    status.is_loading = false;
                    status.last_error = Some(e.to_string());
                    status.failed_records = failed_records;
                });
            }
        }

        result.map(|mut report| {
            report.duration = start.elapsed();
            report
        })
    }

    async fn run_pass(&self, owner: &OwnerId) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            failures: self.take_deferred(owner),
            ..ReconcileReport::default()
        };

        // Push phase.
        let pending = self.inner.store.list_pending(owner)?;
        debug!("Push phase: {} pending records", pending.len());

        let outcomes: Vec<PushOutcome> = stream::iter(pending)
            .map(|record| self.push_record(record.local_id))
            .buffer_unordered(self.inner.config.push_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                PushOutcome::Pushed => report.pushed += 1,
                PushOutcome::Deleted => report.deleted += 1,
                PushOutcome::Skipped => {}
                PushOutcome::Stalled => report.stalled += 1,
                PushOutcome::Failed(failure) => report.failures.push(failure),
            }
        }

        // Pull phase.
        let cursor = self
            .inner
            .store
            .pull_cursor(owner)?
            .unwrap_or_else(time::epoch);
        debug!("Pull phase: cursor {}", cursor);

        let remote_records = match self.inner.remote.list_modified_since(owner, cursor).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Pull failed: {}", e);
                report.pull_error = Some(e.to_string());
                return Ok(report);
            }
        };

        let mut high_water = cursor;
        for remote_record in remote_records {
            if &remote_record.owner_id != owner {
                continue;
            }
            match self.merge(owner, &remote_record)? {
                MergeOutcome::Created => report.pulled_created += 1,
                MergeOutcome::Updated => report.pulled_updated += 1,
                MergeOutcome::Skipped => report.skipped += 1,
            }
            high_water = high_water.max(remote_record.updated_at());
        }

        // Advanced only once every listed document is merged.
        if high_water > cursor {
            self.inner.store.set_pull_cursor(owner, high_water)?;
        }

        Ok(report)
    }

    /// Merge one pulled document in its own transaction.
    fn merge(&self, owner: &OwnerId, remote_record: &RemoteRecord) -> Result<MergeOutcome> {
        let mut outcome = MergeOutcome::Skipped;

        self.inner.store.transaction(WriteOrigin::Sync, &mut |txn| {
            let local = txn.get_by_remote_id(&remote_record.remote_id)?;
            outcome = match conflict::resolve(local.as_ref(), remote_record) {
                Resolution::Insert => {
                    let record = TaskRecord::from_remote(
                        owner.clone(),
                        remote_record.remote_id.clone(),
                        &remote_record.fields,
                    );
                    txn.put(&record)?;
                    MergeOutcome::Created
                }
                Resolution::Overwrite => match local.clone() {
                    Some(mut record) => {
                        record.overwrite_from(&remote_record.fields);
                        txn.put(&record)?;
                        MergeOutcome::Updated
                    }
                    None => MergeOutcome::Skipped,
                },
                Resolution::Skip(reason) => {
                    debug!("Skipping {}: {:?}", remote_record.remote_id, reason);
                    MergeOutcome::Skipped
                }
            };
            Ok(())
        })?;

        Ok(outcome)
    }

    /// Push a mutation's record without blocking the caller.
    ///
    /// Without a tokio runtime the record stays pending for the next pass.
    fn spawn_push(&self, local_id: LocalId) {
        let Ok(handle) = Handle::try_current() else {
            debug!("No runtime; {} left for the next pass", local_id);
            return;
        };

        let engine = self.clone();
        self.inner.background.spawn_on(
            async move {
                engine.background_push(local_id).await;
            },
            &handle,
        );
    }

    async fn background_push(&self, local_id: LocalId) {
        let owner = match self.owner() {
            Ok(owner) => owner,
            Err(e) => {
                debug!("Background push of {} skipped: {}", local_id, e);
                return;
            }
        };

        if let PushOutcome::Failed(failure) = self.push_record(local_id).await {
            if failure.permanent {
                lock(&self.inner.deferred)
                    .entry(owner.clone())
                    .or_default()
                    .push(failure);
            }
            let failed_records = self.count_failed(&owner);
            self.inner
                .status
                .send_modify(|status| status.failed_records = failed_records);
        }
    }

    /// Send the current state of one record to the remote store.
    async fn push_record(&self, local_id: LocalId) -> PushOutcome {
        let Some(_guard) = SetGuard::acquire(&self.inner.in_flight, &local_id) else {
            debug!("Push of {} already in flight", local_id);
            return PushOutcome::Skipped;
        };

        // Re-read under the guard so the latest payload is sent.
        let record = match self.inner.store.get(&local_id) {
            Ok(record) => record,
            Err(Error::NotFound(_)) => return PushOutcome::Skipped,
            Err(e) => return self.failed(&local_id, e),
        };

        if record.is_stalled(self.inner.config.max_permanent_failures) {
            debug!(
                "Task {} stalled after {} rejections",
                local_id, record.failure_count
            );
            return PushOutcome::Stalled;
        }

        let remote = &self.inner.remote;
        let result = match (record.sync_state, &record.remote_id) {
            (SyncState::Synced, _) => return PushOutcome::Skipped,
            (SyncState::PendingDelete, Some(remote_id)) => match remote.delete(remote_id).await {
                Ok(()) => self.finish_delete(&local_id),
                Err(e) => Err(e),
            },
            (SyncState::PendingDelete, None) => self.finish_delete(&local_id),
            (SyncState::PendingPush, None) => {
                match remote.create(&record.owner_id, &record.fields()).await {
                    Ok(ack) => self.write_back(&local_id, record.updated_at, &ack, true).await,
                    Err(e) => Err(e),
                }
            }
            (SyncState::PendingPush, Some(remote_id)) => {
                match remote.update(remote_id, &record.fields()).await {
                    Ok(ack) => self.write_back(&local_id, record.updated_at, &ack, false).await,
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => self.failed(&local_id, e),
        }
    }

    fn finish_delete(&self, local_id: &LocalId) -> Result<PushOutcome> {
        self.inner.store.transaction(WriteOrigin::Sync, &mut |txn| {
            txn.delete(local_id).map(|_| ())
        })?;
        debug!("Task {} deleted remotely and locally", local_id);
        Ok(PushOutcome::Deleted)
    }

    /// Record a successful remote write.
    ///
    /// The record only becomes `Synced` if it was not edited or deleted while
    /// the call was in flight. A document created for a record that vanished
    /// meanwhile is deleted again.
    async fn write_back(
        &self,
        local_id: &LocalId,
        sent_updated_at: Timestamp,
        ack: &RemoteAck,
        created: bool,
    ) -> Result<PushOutcome> {
        let mut orphaned = false;

        self.inner.store.transaction(WriteOrigin::Sync, &mut |txn| {
            orphaned = false;
            let Some(mut current) = txn.get(local_id)? else {
                orphaned = true;
                return Ok(());
            };

            // A pull may have mirrored the new document before this write-back.
            if let Some(mirror) = txn.get_by_remote_id(&ack.remote_id)? {
                if &mirror.local_id != local_id {
                    txn.delete(&mirror.local_id)?;
                }
            }

            if current.sync_state == SyncState::PendingPush
                && current.updated_at == sent_updated_at
            {
                current.mark_synced(ack.remote_id.clone(), ack.updated_at);
            } else {
                current.remote_id = Some(ack.remote_id.clone());
                // The edit made during the call must stay newer than the stamped version.
                if current.sync_state == SyncState::PendingPush
                    && current.updated_at <= ack.updated_at
                {
                    current.updated_at = time::bump(ack.updated_at);
                }
            }
            txn.put(&current)
        })?;

        if orphaned {
            if created {
                debug!("Task {} vanished during create; removing {}", local_id, ack.remote_id);
                if let Err(e) = self.inner.remote.delete(&ack.remote_id).await {
                    warn!("Failed to remove orphaned document {}: {}", ack.remote_id, e);
                }
            }
            return Ok(PushOutcome::Skipped);
        }

        Ok(PushOutcome::Pushed)
    }

    fn failed(&self, local_id: &LocalId, error: Error) -> PushOutcome {
        warn!("Push of {} failed: {}", local_id, error);

        let recorded = self.inner.store.transaction(WriteOrigin::Sync, &mut |txn| {
            if let Some(mut current) = txn.get(local_id)? {
                current.mark_failed(&error);
                txn.put(&current)?;
            }
            Ok(())
        });
        if let Err(e) = recorded {
            warn!("Failed to record push failure of {}: {}", local_id, e);
        }

        PushOutcome::Failed(PushFailure::new(local_id.clone(), &error))
    }

    fn take_deferred(&self, owner: &OwnerId) -> Vec<PushFailure> {
        lock(&self.inner.deferred).remove(owner).unwrap_or_default()
    }

    fn count_failed(&self, owner: &OwnerId) -> usize {
        match self.inner.store.list_by_owner(owner) {
            Ok(records) => records.iter().filter(|r| r.failure_count > 0).count(),
            Err(e) => {
                warn!("Failed to count failed records: {}", e);
                0
            }
        }
    }

    /// Apply `change` to one of the owner's visible records as a local write.
    fn edit(
        &self,
        local_id: &LocalId,
        mut change: impl FnMut(&mut TaskRecord),
    ) -> Result<TaskRecord> {
        let owner = self.owner()?;
        let mut edited = None;

        self.inner
            .store
            .transaction(WriteOrigin::Local, &mut |txn| {
                let mut record = owned_record(txn, local_id, &owner)?;
                if record.sync_state == SyncState::PendingDelete {
                    return Err(Error::NotFound(format!("Task deleted: {}", local_id)));
                }
                change(&mut record);
                txn.put(&record)?;
                edited = Some(record);
                Ok(())
            })?;

        edited.ok_or_else(|| Error::NotFound(format!("Task not found: {}", local_id)))
    }
}

/// Read a record inside a transaction, hiding other owners' records.
fn owned_record(txn: &dyn StoreTxn, local_id: &LocalId, owner: &OwnerId) -> Result<TaskRecord> {
    match txn.get(local_id)? {
        Some(record) if &record.owner_id == owner => Ok(record),
        _ => Err(Error::NotFound(format!("Task not found: {}", local_id))),
    }
}
