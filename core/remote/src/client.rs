//! Remote store client trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tasksync_common::{time, OwnerId, RemoteId, Result, TaskFields, Timestamp};

/// A task document as held by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: RemoteId,
    pub owner_id: OwnerId,
    pub fields: TaskFields,
}

impl RemoteRecord {
    /// Server-side modification time.
    pub fn updated_at(&self) -> Timestamp {
        self.fields.updated_at
    }
}

/// Acknowledgement of a successful remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAck {
    pub remote_id: RemoteId,
    /// `updated_at` as stored by the remote.
    pub updated_at: Timestamp,
}

/// Remote document store client.
///
/// All operations are async and may fail transiently.
/// Implementations must handle their own authentication and rate limiting.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the provider name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Create a document owned by `owner_id`.
    ///
    /// # Errors
    /// - `RemoteUnavailable` on network/throttling/auth-token faults
    /// - `RemoteRejected` on malformed payload or permission denied
    async fn create(&self, owner_id: &OwnerId, fields: &TaskFields) -> Result<RemoteAck>;

    /// Replace the mutable fields of an existing document.
    ///
    /// # Errors
    /// - `RemoteNotFound` if the document does not exist
    /// - Otherwise as [`RemoteStore::create`]
    async fn update(&self, remote_id: &RemoteId, fields: &TaskFields) -> Result<RemoteAck>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, remote_id: &RemoteId) -> Result<()>;

    /// Documents of `owner_id` with `updated_at >= cursor`, newest first.
    ///
    /// `updated_at` is assigned by the remote on every accepted write, so a
    /// document pushed late by an offline client still sorts after every
    /// cursor handed out before the push.
    async fn list_modified_since(
        &self,
        owner_id: &OwnerId,
        cursor: Timestamp,
    ) -> Result<Vec<RemoteRecord>>;
}

/// Order documents newest `updated_at` first.
pub(crate) fn sort_newest_first(records: &mut [RemoteRecord]) {
    records.sort_by(|a, b| {
        b.updated_at()
            .cmp(&a.updated_at())
            .then_with(|| a.remote_id.cmp(&b.remote_id))
    });
}

/// Modification time for an accepted write.
///
/// Taken from the remote's clock, never earlier than the client's
/// `updated_at`, and strictly after the document's previous stamp.
pub(crate) fn stamp(incoming: Timestamp, previous: Option<Timestamp>) -> Timestamp {
    let stamp = match previous {
        Some(previous) => time::bump(previous),
        None => time::now(),
    };
    stamp.max(incoming)
}

/// Validate a payload the way a document store would.
pub(crate) fn validate_fields(fields: &TaskFields) -> Result<()> {
    if fields.title.trim().is_empty() {
        return Err(tasksync_common::Error::RemoteRejected(
            "title must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_common::time;

    #[test]
    fn test_remote_record_serialization() {
        let now = time::now();
        let record = RemoteRecord {
            remote_id: RemoteId::new("doc-1").unwrap(),
            owner_id: OwnerId::new("owner-1").unwrap(),
            fields: TaskFields {
                title: "Buy milk".to_string(),
                description: None,
                is_completed: false,
                created_at: now,
                updated_at: now,
            },
        };

        let json = serde_json::to_string(&record).unwrap();
        let restored: RemoteRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_stamp_uses_remote_clock() {
        let before = time::now();
        let old = time::from_millis(1_000);
        assert!(stamp(old, None) >= before);

        let future = before + chrono::Duration::seconds(60);
        assert_eq!(stamp(future, None), future);

        let previous = before + chrono::Duration::seconds(30);
        assert_eq!(stamp(old, Some(previous)), previous + chrono::Duration::milliseconds(1));
    }
}
