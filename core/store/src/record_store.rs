//! Record store trait definition.

use tasksync_common::{Error, LocalId, OwnerId, RemoteId, Result, TaskRecord, Timestamp};

use crate::notify::{ChangeCallback, Subscription, WriteOrigin};

/// Operations available inside a scoped write transaction.
///
/// Reads observe the transaction's own uncommitted writes.
pub trait StoreTxn {
    /// Look up a record by local id.
    fn get(&self, local_id: &LocalId) -> Result<Option<TaskRecord>>;

    /// Look up the record mapped to a remote id.
    fn get_by_remote_id(&self, remote_id: &RemoteId) -> Result<Option<TaskRecord>>;

    /// Insert or replace a record by local id.
    ///
    /// # Errors
    /// - `Conflict` if another record already maps to the same remote id
    /// - `Store` on durability failure
    fn put(&mut self, record: &TaskRecord) -> Result<()>;

    /// Remove a record. Returns whether a record was present.
    fn delete(&mut self, local_id: &LocalId) -> Result<bool>;
}

/// Durable, synchronous storage of task records.
///
/// Every committed transaction that issued at least one `put` or `delete`
/// fires exactly one change notification, after the write is durable.
pub trait RecordStore: Send + Sync {
    /// Get the store name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Run `f` inside a write transaction.
    ///
    /// # Postconditions
    /// - If `f` returns `Ok`, all of its writes are committed together
    /// - If `f` returns `Err`, none of its writes are visible
    fn transaction(
        &self,
        origin: WriteOrigin,
        f: &mut dyn FnMut(&mut dyn StoreTxn) -> Result<()>,
    ) -> Result<()>;

    /// Get a record by local id.
    ///
    /// # Errors
    /// - `NotFound` if no record has this id
    fn get(&self, local_id: &LocalId) -> Result<TaskRecord>;

    /// Get the record mapped to a remote id.
    ///
    /// # Errors
    /// - `NotFound` if no record maps to this id
    fn get_by_remote_id(&self, remote_id: &RemoteId) -> Result<TaskRecord>;

    /// All records of an owner, newest `created_at` first.
    ///
    /// Includes `PendingDelete` records; see [`RecordStore::visible_by_owner`].
    fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<TaskRecord>>;

    /// Register a change callback.
    fn subscribe(&self, callback: ChangeCallback) -> Subscription;

    /// Greatest remote `updated_at` the pull phase has merged for an owner.
    ///
    /// Only pulls move it; pushes never do, so a document another client
    /// stamps after our last pull is still listed by the next one.
    fn pull_cursor(&self, owner_id: &OwnerId) -> Result<Option<Timestamp>>;

    /// Persist the pull cursor. Does not fire a change notification.
    ///
    /// # Errors
    /// - `Store` on durability failure
    fn set_pull_cursor(&self, owner_id: &OwnerId, cursor: Timestamp) -> Result<()>;

    /// Upsert a record as a local write.
    fn put(&self, record: &TaskRecord) -> Result<()> {
        self.transaction(WriteOrigin::Local, &mut |txn| txn.put(record))
    }

    /// Remove a record as a local write. Absent records are not an error.
    fn delete(&self, local_id: &LocalId) -> Result<()> {
        self.transaction(WriteOrigin::Local, &mut |txn| txn.delete(local_id).map(|_| ()))
    }

    /// Records shown to the user: everything except `PendingDelete`.
    fn visible_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<TaskRecord>> {
        Ok(self
            .list_by_owner(owner_id)?
            .into_iter()
            .filter(TaskRecord::is_visible)
            .collect())
    }

    /// Records the push phase has work for, oldest first.
    fn list_pending(&self, owner_id: &OwnerId) -> Result<Vec<TaskRecord>> {
        let mut pending: Vec<TaskRecord> = self
            .list_by_owner(owner_id)?
            .into_iter()
            .filter(|r| r.sync_state.is_pending())
            .collect();
        pending.reverse();
        Ok(pending)
    }
}

pub(crate) fn not_found(what: impl std::fmt::Display) -> Error {
    Error::NotFound(format!("Task not found: {}", what))
}
