//! In-memory record store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tasksync_common::{Error, LocalId, OwnerId, RemoteId, Result, TaskRecord, Timestamp};

use crate::notify::{ChangeCallback, Notifier, StoreEvent, Subscription, WriteOrigin};
use crate::record_store::{not_found, RecordStore, StoreTxn};

/// In-memory record store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Writes can be made to fail to exercise
/// durability-fault paths.
pub struct MemoryRecordStore {
    records: RwLock<HashMap<LocalId, TaskRecord>>,
    cursors: RwLock<HashMap<OwnerId, Timestamp>>,
    notifier: Notifier,
    fail_writes: AtomicBool,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            notifier: Notifier::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent transaction fail with a store fault.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records, including pending deletes.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> Error {
    Error::Store("record store lock poisoned".to_string())
}

/// Uncommitted overlay over the committed map.
struct MemoryTxn<'a> {
    base: &'a HashMap<LocalId, TaskRecord>,
    writes: HashMap<LocalId, Option<TaskRecord>>,
    changed: Vec<LocalId>,
}

impl MemoryTxn<'_> {
    fn current(&self) -> impl Iterator<Item = &TaskRecord> {
        let overlaid = self.writes.values().flatten();
        let untouched = self
            .base
            .values()
            .filter(|r| !self.writes.contains_key(&r.local_id));
        overlaid.chain(untouched)
    }
}

impl StoreTxn for MemoryTxn<'_> {
    fn get(&self, local_id: &LocalId) -> Result<Option<TaskRecord>> {
        match self.writes.get(local_id) {
            Some(write) => Ok(write.clone()),
            None => Ok(self.base.get(local_id).cloned()),
        }
    }

    fn get_by_remote_id(&self, remote_id: &RemoteId) -> Result<Option<TaskRecord>> {
        Ok(self
            .current()
            .find(|r| r.remote_id.as_ref() == Some(remote_id))
            .cloned())
    }

    fn put(&mut self, record: &TaskRecord) -> Result<()> {
        if let Some(remote_id) = &record.remote_id {
            let clash = self
                .current()
                .any(|r| r.remote_id.as_ref() == Some(remote_id) && r.local_id != record.local_id);
            if clash {
                return Err(Error::Conflict(format!(
                    "remote id {} is already mapped to another task",
                    remote_id
                )));
            }
        }

        self.writes
            .insert(record.local_id.clone(), Some(record.clone()));
        self.changed.push(record.local_id.clone());
        Ok(())
    }

    fn delete(&mut self, local_id: &LocalId) -> Result<bool> {
        let existed = self.get(local_id)?.is_some();
        self.writes.insert(local_id.clone(), None);
        self.changed.push(local_id.clone());
        Ok(existed)
    }
}

impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn transaction(
        &self,
        origin: WriteOrigin,
        f: &mut dyn FnMut(&mut dyn StoreTxn) -> Result<()>,
    ) -> Result<()> {
        let changed = {
            let mut records = self.records.write().map_err(|_| poisoned())?;

            let mut txn = MemoryTxn {
                base: &*records,
                writes: HashMap::new(),
                changed: Vec::new(),
            };
            f(&mut txn)?;

            if txn.changed.is_empty() {
                return Ok(());
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Store("simulated durability failure".to_string()));
            }

            let MemoryTxn { writes, changed, .. } = txn;
            for (local_id, write) in writes {
                match write {
                    Some(record) => {
                        records.insert(local_id, record);
                    }
                    None => {
                        records.remove(&local_id);
                    }
                }
            }
            changed
        };

        self.notifier.notify(&StoreEvent { origin, changed });
        Ok(())
    }

    fn get(&self, local_id: &LocalId) -> Result<TaskRecord> {
        self.records
            .read()
            .map_err(|_| poisoned())?
            .get(local_id)
            .cloned()
            .ok_or_else(|| not_found(local_id))
    }

    fn get_by_remote_id(&self, remote_id: &RemoteId) -> Result<TaskRecord> {
        self.records
            .read()
            .map_err(|_| poisoned())?
            .values()
            .find(|r| r.remote_id.as_ref() == Some(remote_id))
            .cloned()
            .ok_or_else(|| not_found(remote_id))
    }

    fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self
            .records
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        Ok(records)
    }

    fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        self.notifier.subscribe(callback)
    }

    fn pull_cursor(&self, owner_id: &OwnerId) -> Result<Option<Timestamp>> {
        Ok(self
            .cursors
            .read()
            .map_err(|_| poisoned())?
            .get(owner_id)
            .copied())
    }

    fn set_pull_cursor(&self, owner_id: &OwnerId, cursor: Timestamp) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("simulated durability failure".to_string()));
        }
        self.cursors
            .write()
            .map_err(|_| poisoned())?
            .insert(owner_id.clone(), cursor);
        Ok(())
    }
}
