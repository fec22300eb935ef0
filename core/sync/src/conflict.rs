//! Last-write-wins resolution between a local record and a pulled document.

use tasksync_common::{SyncState, TaskRecord};
use tasksync_remote::RemoteRecord;

/// What the pull phase does with one remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local record maps to the document; mirror it.
    Insert,
    /// The remote version is strictly newer; overwrite the local fields.
    Overwrite,
    /// Leave the local record alone.
    Skip(SkipReason),
}

/// Why a pulled document was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Equal `updated_at`: the version is already applied.
    AlreadyApplied,
    /// Local `updated_at` is greater; a later push propagates it.
    LocalNewer,
    /// The local record is waiting for its remote deletion.
    PendingDelete,
}

/// Decide how a pulled document merges into the local store.
///
/// `local` is the record currently mapped to the document's remote id.
pub fn resolve(local: Option<&TaskRecord>, remote: &RemoteRecord) -> Resolution {
    let Some(local) = local else {
        return Resolution::Insert;
    };

    if local.sync_state == SyncState::PendingDelete {
        return Resolution::Skip(SkipReason::PendingDelete);
    }

    let remote_updated_at = remote.updated_at();
    if local.updated_at < remote_updated_at {
        Resolution::Overwrite
    } else if local.updated_at == remote_updated_at {
        Resolution::Skip(SkipReason::AlreadyApplied)
    } else {
        Resolution::Skip(SkipReason::LocalNewer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tasksync_common::time::from_millis;
    use tasksync_common::{OwnerId, RemoteId, TaskFields};

    fn local_at(millis: i64, state: SyncState) -> TaskRecord {
        let owner = OwnerId::new("owner").unwrap();
        let remote_id = RemoteId::new("doc-1").unwrap();
        let fields = TaskFields {
            title: "Local".to_string(),
            description: None,
            is_completed: false,
            created_at: from_millis(0),
            updated_at: from_millis(millis),
        };
        let mut record = TaskRecord::from_remote(owner, remote_id, &fields);
        record.sync_state = state;
        record
    }

    fn remote_at(millis: i64) -> RemoteRecord {
        RemoteRecord {
            remote_id: RemoteId::new("doc-1").unwrap(),
            owner_id: OwnerId::new("owner").unwrap(),
            fields: TaskFields {
                title: "Remote".to_string(),
                description: None,
                is_completed: true,
                created_at: from_millis(0),
                updated_at: from_millis(millis),
            },
        }
    }

    #[test]
    fn test_unknown_document_is_inserted() {
        assert_eq!(resolve(None, &remote_at(10)), Resolution::Insert);
    }

    #[test]
    fn test_timestamp_ordering() {
        let local = local_at(10, SyncState::Synced);
        assert_eq!(resolve(Some(&local), &remote_at(11)), Resolution::Overwrite);
        assert_eq!(
            resolve(Some(&local), &remote_at(10)),
            Resolution::Skip(SkipReason::AlreadyApplied)
        );
        assert_eq!(
            resolve(Some(&local), &remote_at(9)),
            Resolution::Skip(SkipReason::LocalNewer)
        );
    }

    #[test]
    fn test_pending_push_loses_to_newer_remote() {
        let local = local_at(10, SyncState::PendingPush);
        assert_eq!(resolve(Some(&local), &remote_at(20)), Resolution::Overwrite);
    }

    #[test]
    fn test_pending_delete_is_kept() {
        let local = local_at(10, SyncState::PendingDelete);
        assert_eq!(
            resolve(Some(&local), &remote_at(20)),
            Resolution::Skip(SkipReason::PendingDelete)
        );
    }

    proptest! {
        #[test]
        fn prop_merge_never_regresses(local_ms in 0i64..1_000_000, remote_ms in 0i64..1_000_000) {
            let mut local = local_at(local_ms, SyncState::Synced);
            let remote = remote_at(remote_ms);
            let before = local.updated_at;

            if resolve(Some(&local), &remote) == Resolution::Overwrite {
                local.overwrite_from(&remote.fields);
            }

            prop_assert!(local.updated_at >= before);
            prop_assert_eq!(local.updated_at, before.max(remote.updated_at()));
        }

        #[test]
        fn prop_applying_twice_is_noop(local_ms in 0i64..1_000_000, remote_ms in 0i64..1_000_000) {
            let mut local = local_at(local_ms, SyncState::Synced);
            let remote = remote_at(remote_ms);

            if resolve(Some(&local), &remote) == Resolution::Overwrite {
                local.overwrite_from(&remote.fields);
            }
            prop_assert_ne!(resolve(Some(&local), &remote), Resolution::Overwrite);
        }
    }
}
