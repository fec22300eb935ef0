//! In-memory remote store for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

use tasksync_common::{Error, OwnerId, RemoteId, Result, TaskFields, Timestamp};

use crate::client::{sort_newest_first, stamp, validate_fields, RemoteAck, RemoteRecord, RemoteStore};

/// Injected failure behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Calls behave normally.
    None,
    /// Every call fails with `RemoteUnavailable`.
    Unavailable,
    /// Every create and update fails with `RemoteRejected`.
    Reject,
    /// Every delete fails with `RemoteRejected`.
    RejectDeletes,
}

/// Snapshot of how many calls reached the remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub lists: usize,
}

impl CallCounts {
    /// Number of write calls.
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Default)]
struct Counters {
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
}

/// In-memory remote store.
///
/// Stands in for the remote document store in tests and demos. Supports
/// going offline, rejecting payloads, artificial latency, and edits made
/// "from another device".
pub struct MemoryRemote {
    documents: RwLock<HashMap<RemoteId, RemoteRecord>>,
    fail_mode: RwLock<FailMode>,
    rejected_titles: RwLock<HashSet<String>>,
    latency: RwLock<Option<Duration>>,
    counters: Counters,
}

impl MemoryRemote {
    /// Create a new empty, online remote.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            fail_mode: RwLock::new(FailMode::None),
            rejected_titles: RwLock::new(HashSet::new()),
            latency: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    /// Toggle connectivity.
    pub fn set_online(&self, online: bool) {
        self.set_fail_mode(if online {
            FailMode::None
        } else {
            FailMode::Unavailable
        });
    }

    /// Set the injected failure behavior.
    pub fn set_fail_mode(&self, mode: FailMode) {
        if let Ok(mut current) = self.fail_mode.write() {
            *current = mode;
        }
    }

    /// Permanently reject writes whose title equals `title`.
    pub fn reject_title(&self, title: impl Into<String>) {
        if let Ok(mut titles) = self.rejected_titles.write() {
            titles.insert(title.into());
        }
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut current) = self.latency.write() {
            *current = latency;
        }
    }

    /// Calls received so far (including failed ones).
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            creates: self.counters.creates.load(Ordering::SeqCst),
            updates: self.counters.updates.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            lists: self.counters.lists.load(Ordering::SeqCst),
        }
    }

    /// Fetch a document directly.
    pub fn document(&self, remote_id: &RemoteId) -> Option<RemoteRecord> {
        self.documents.read().ok()?.get(remote_id).cloned()
    }

    /// All documents of an owner, newest first.
    pub fn documents(&self, owner_id: &OwnerId) -> Vec<RemoteRecord> {
        let mut docs: Vec<RemoteRecord> = self
            .documents
            .read()
            .map(|d| d.values().filter(|r| &r.owner_id == owner_id).cloned().collect())
            .unwrap_or_default();
        sort_newest_first(&mut docs);
        docs
    }

    /// Write a document as another client would, bypassing failure injection.
    pub fn put_document(&self, record: RemoteRecord) {
        if let Ok(mut docs) = self.documents.write() {
            docs.insert(record.remote_id.clone(), record);
        }
    }

    /// Edit an existing document as another client would.
    ///
    /// Returns false if the document does not exist.
    pub fn edit_document(
        &self,
        remote_id: &RemoteId,
        updated_at: Timestamp,
        edit: impl FnOnce(&mut TaskFields),
    ) -> bool {
        let Ok(mut docs) = self.documents.write() else {
            return false;
        };
        match docs.get_mut(remote_id) {
            Some(doc) => {
                edit(&mut doc.fields);
                doc.fields.updated_at = updated_at;
                true
            }
            None => false,
        }
    }

    async fn before_call(&self, call: Call<'_>) -> Result<()> {
        let latency = self.latency.read().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mode = self
            .fail_mode
            .read()
            .map(|m| *m)
            .unwrap_or(FailMode::None);
        match mode {
            FailMode::Unavailable => {
                return Err(Error::RemoteUnavailable("remote is offline".to_string()));
            }
            FailMode::Reject if matches!(call, Call::Write(_)) => {
                return Err(Error::RemoteRejected("permission denied".to_string()));
            }
            FailMode::RejectDeletes if matches!(call, Call::Delete) => {
                return Err(Error::RemoteRejected("delete not permitted".to_string()));
            }
            _ => {}
        }

        if let Call::Write(fields) = call {
            validate_fields(fields)?;
            let rejected = self
                .rejected_titles
                .read()
                .map(|t| t.contains(&fields.title))
                .unwrap_or(false);
            if rejected {
                return Err(Error::RemoteRejected(format!(
                    "payload rejected: {}",
                    fields.title
                )));
            }
        }
        Ok(())
    }

    fn lock_err() -> Error {
        Error::RemoteUnavailable("remote state lock poisoned".to_string())
    }
}

/// Kind of call passing through failure injection.
#[derive(Clone, Copy)]
enum Call<'a> {
    Write(&'a TaskFields),
    Delete,
    List,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, owner_id: &OwnerId, fields: &TaskFields) -> Result<RemoteAck> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        self.before_call(Call::Write(fields)).await?;

        let remote_id = RemoteId::new(Uuid::new_v4().simple().to_string())?;
        let mut stored = fields.clone();
        stored.updated_at = stamp(fields.updated_at, None);
        let updated_at = stored.updated_at;

        self.documents.write().map_err(|_| Self::lock_err())?.insert(
            remote_id.clone(),
            RemoteRecord {
                remote_id: remote_id.clone(),
                owner_id: owner_id.clone(),
                fields: stored,
            },
        );

        Ok(RemoteAck {
            remote_id,
            updated_at,
        })
    }

    async fn update(&self, remote_id: &RemoteId, fields: &TaskFields) -> Result<RemoteAck> {
        self.counters.updates.fetch_add(1, Ordering::SeqCst);
        self.before_call(Call::Write(fields)).await?;

        let mut docs = self.documents.write().map_err(|_| Self::lock_err())?;
        let doc = docs
            .get_mut(remote_id)
            .ok_or_else(|| Error::RemoteNotFound(remote_id.to_string()))?;

        doc.fields.title = fields.title.clone();
        doc.fields.description = fields.description.clone();
        doc.fields.is_completed = fields.is_completed;
        doc.fields.updated_at = stamp(fields.updated_at, Some(doc.fields.updated_at));

        Ok(RemoteAck {
            remote_id: remote_id.clone(),
            updated_at: doc.fields.updated_at,
        })
    }

    async fn delete(&self, remote_id: &RemoteId) -> Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.before_call(Call::Delete).await?;

        self.documents
            .write()
            .map_err(|_| Self::lock_err())?
            .remove(remote_id);
        Ok(())
    }

    async fn list_modified_since(
        &self,
        owner_id: &OwnerId,
        cursor: Timestamp,
    ) -> Result<Vec<RemoteRecord>> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        self.before_call(Call::List).await?;

        let mut records: Vec<RemoteRecord> = self
            .documents
            .read()
            .map_err(|_| Self::lock_err())?
            .values()
            .filter(|r| &r.owner_id == owner_id && r.updated_at() >= cursor)
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tasksync_common::time;

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").unwrap()
    }

    fn fields(title: &str) -> TaskFields {
        let now = time::now();
        TaskFields {
            title: title.to_string(),
            description: None,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let remote = MemoryRemote::new();
        let ack = remote.create(&owner(), &fields("Buy milk")).await.unwrap();

        let mut changed = fields("Buy oat milk");
        changed.updated_at = ack.updated_at + ChronoDuration::seconds(1);
        let updated = remote.update(&ack.remote_id, &changed).await.unwrap();
        assert_eq!(updated.updated_at, changed.updated_at);
        assert_eq!(
            remote.document(&ack.remote_id).unwrap().fields.title,
            "Buy oat milk"
        );

        remote.delete(&ack.remote_id).await.unwrap();
        assert!(remote.document(&ack.remote_id).is_none());
        // Deleting again is fine.
        remote.delete(&ack.remote_id).await.unwrap();
        assert_eq!(remote.calls().deletes, 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_remote_not_found() {
        let remote = MemoryRemote::new();
        let missing = RemoteId::new("nope").unwrap();
        let result = remote.update(&missing, &fields("x")).await;
        assert!(matches!(result, Err(Error::RemoteNotFound(_))));
    }

    #[tokio::test]
    async fn test_offline_is_transient() {
        let remote = MemoryRemote::new();
        remote.set_online(false);

        let err = remote.create(&owner(), &fields("Buy milk")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(remote.documents(&owner()).is_empty());
    }

    #[tokio::test]
    async fn test_rejections_are_permanent() {
        let remote = MemoryRemote::new();
        remote.reject_title("forbidden");

        let err = remote.create(&owner(), &fields("forbidden")).await.unwrap_err();
        assert!(err.is_permanent());
        let err = remote.create(&owner(), &fields("  ")).await.unwrap_err();
        assert!(err.is_permanent());
        assert!(remote.create(&owner(), &fields("fine")).await.is_ok());
    }

    fn document(id: &str, owner_id: OwnerId, title: &str, updated_at: Timestamp) -> RemoteRecord {
        let mut fields = fields(title);
        fields.updated_at = updated_at;
        RemoteRecord {
            remote_id: RemoteId::new(id).unwrap(),
            owner_id,
            fields,
        }
    }

    #[tokio::test]
    async fn test_list_modified_since_is_inclusive_and_ordered() {
        let remote = MemoryRemote::new();
        let base = time::now();

        remote.put_document(document("a", owner(), "older", base - ChronoDuration::seconds(10)));
        remote.put_document(document("b", owner(), "newer", base));
        remote.put_document(document("c", OwnerId::new("other").unwrap(), "newer", base));

        let all = remote.list_modified_since(&owner(), time::epoch()).await.unwrap();
        let titles: Vec<&str> = all.iter().map(|r| r.fields.title.as_str()).collect();
        assert_eq!(titles, vec!["newer", "older"]);

        let since = remote.list_modified_since(&owner(), base).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].fields.title, "newer");
    }

    #[tokio::test]
    async fn test_writes_are_stamped_by_remote_clock() {
        let remote = MemoryRemote::new();
        let before = time::now();

        let mut stale = fields("Written offline");
        stale.updated_at = before - ChronoDuration::hours(1);
        let ack = remote.create(&owner(), &stale).await.unwrap();
        assert!(ack.updated_at >= before);
        assert_eq!(remote.document(&ack.remote_id).unwrap().updated_at(), ack.updated_at);

        let updated = remote.update(&ack.remote_id, &stale).await.unwrap();
        assert!(updated.updated_at > ack.updated_at);

        let listed = remote.list_modified_since(&owner(), before).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].updated_at(), updated.updated_at);
    }

    #[tokio::test]
    async fn test_reject_deletes_is_permanent() {
        let remote = MemoryRemote::new();
        let ack = remote.create(&owner(), &fields("Protected")).await.unwrap();
        remote.set_fail_mode(FailMode::RejectDeletes);

        let err = remote.delete(&ack.remote_id).await.unwrap_err();
        assert!(err.is_permanent());
        assert!(remote.document(&ack.remote_id).is_some());
        assert!(remote.update(&ack.remote_id, &fields("Still editable")).await.is_ok());
    }

    #[tokio::test]
    async fn test_edit_document_from_another_device() {
        let remote = MemoryRemote::new();
        let ack = remote.create(&owner(), &fields("Buy milk")).await.unwrap();
        let later = ack.updated_at + ChronoDuration::seconds(5);

        assert!(remote.edit_document(&ack.remote_id, later, |f| {
            f.title = "Buy oat milk".to_string();
        }));

        let doc = remote.document(&ack.remote_id).unwrap();
        assert_eq!(doc.fields.title, "Buy oat milk");
        assert_eq!(doc.updated_at(), later);
    }
}
