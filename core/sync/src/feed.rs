//! Reactive listing of an owner's visible tasks.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use tasksync_common::{OwnerId, Result, TaskRecord};
use tasksync_store::{RecordStore, StoreEvent, Subscription};

/// Visible tasks of one owner, republished after every committed write.
///
/// The listing excludes `PendingDelete` records and is ordered newest
/// `created_at` first. Dropping the feed unsubscribes from the store.
pub struct TaskFeed {
    receiver: watch::Receiver<Vec<TaskRecord>>,
    _subscription: Subscription,
}

impl TaskFeed {
    /// Subscribe to `store` and publish the current listing.
    ///
    /// # Errors
    /// - `Store` if the initial listing cannot be read
    pub fn new(store: Arc<dyn RecordStore>, owner_id: OwnerId) -> Result<Self> {
        let initial = store.visible_by_owner(&owner_id)?;
        let (sender, receiver) = watch::channel(initial);

        let weak_store = Arc::downgrade(&store);
        let subscription = store.subscribe(Arc::new(move |_event: &StoreEvent| {
            let Some(store) = weak_store.upgrade() else {
                return;
            };
            match store.visible_by_owner(&owner_id) {
                Ok(tasks) => {
                    sender.send_if_modified(|current| {
                        if *current == tasks {
                            return false;
                        }
                        *current = tasks;
                        true
                    });
                }
                Err(e) => warn!("Failed to refresh task feed: {}", e),
            }
        }));

        Ok(Self {
            receiver,
            _subscription: subscription,
        })
    }

    /// The latest listing.
    pub fn current(&self) -> Vec<TaskRecord> {
        self.receiver.borrow().clone()
    }

    /// A receiver for use in `select!` loops.
    pub fn subscribe(&self) -> watch::Receiver<Vec<TaskRecord>> {
        self.receiver.clone()
    }

    /// Wait for the listing to change and return it.
    ///
    /// Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Vec<TaskRecord>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_common::{SyncState, TaskPatch};
    use tasksync_store::{MemoryRecordStore, WriteOrigin};

    fn owner() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_feed_tracks_writes() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let mut feed = TaskFeed::new(store.clone(), owner()).unwrap();
        assert!(feed.current().is_empty());

        let mut record = TaskRecord::new_local(owner(), "Feed me", None);
        store.put(&record).unwrap();

        let listed = feed.changed().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Feed me");

        record.apply_patch(&TaskPatch::title("Renamed"));
        store.put(&record).unwrap();
        let listed = feed.changed().await.unwrap();
        assert_eq!(listed[0].title, "Renamed");
    }

    #[tokio::test]
    async fn test_feed_hides_pending_delete() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let feed = TaskFeed::new(store.clone(), owner()).unwrap();

        let mut record = TaskRecord::new_local(owner(), "Doomed", None);
        store.put(&record).unwrap();
        assert_eq!(feed.current().len(), 1);

        record.mark_pending_delete();
        store
            .transaction(WriteOrigin::Sync, &mut |txn| txn.put(&record))
            .unwrap();

        assert!(feed.current().is_empty());
        assert_eq!(
            store.get(&record.local_id).unwrap().sync_state,
            SyncState::PendingDelete
        );
    }

    #[tokio::test]
    async fn test_feed_ignores_other_owners() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let feed = TaskFeed::new(store.clone(), owner()).unwrap();
        let rx = feed.subscribe();

        let bob = OwnerId::new("bob").unwrap();
        store.put(&TaskRecord::new_local(bob, "Not yours", None)).unwrap();

        assert!(!rx.has_changed().unwrap());
        assert!(feed.current().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let store = Arc::new(MemoryRecordStore::new());
        let feed = TaskFeed::new(store.clone(), owner()).unwrap();
        drop(feed);

        // No subscriber left to refresh; the write still succeeds.
        store.put(&TaskRecord::new_local(owner(), "After", None)).unwrap();
        assert_eq!(store.len(), 1);
    }
}
