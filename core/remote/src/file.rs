//! Directory-backed remote store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use tasksync_common::{Error, OwnerId, RemoteId, Result, TaskFields, Timestamp};

use crate::client::{sort_newest_first, stamp, validate_fields, RemoteAck, RemoteRecord, RemoteStore};

/// Remote store keeping one JSON document per task in a directory.
///
/// Point several clients at a shared directory (a synced folder, a network
/// mount) and they converge through it.
pub struct FileRemote {
    root: PathBuf,
}

impl FileRemote {
    /// Create a new file remote with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of the document collection.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, remote_id: &RemoteId) -> Result<PathBuf> {
        let id = remote_id.as_str();
        if id.contains('/') || id.contains('\\') || id.starts_with('.') {
            return Err(Error::RemoteRejected(format!("invalid document id: {}", id)));
        }
        Ok(self.root.join(format!("{}.json", id)))
    }

    async fn read_doc(&self, path: &Path) -> Result<Option<RemoteRecord>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file and rename so readers never see partial JSON.
    async fn write_doc(&self, record: &RemoteRecord) -> Result<()> {
        let path = self.doc_path(&record.remote_id)?;
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", record.remote_id, Uuid::new_v4().simple()));

        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote remote document {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FileRemote {
    fn name(&self) -> &str {
        "file"
    }

    async fn create(&self, owner_id: &OwnerId, fields: &TaskFields) -> Result<RemoteAck> {
        validate_fields(fields)?;

        let remote_id = RemoteId::new(Uuid::new_v4().simple().to_string())?;
        let mut record = RemoteRecord {
            remote_id: remote_id.clone(),
            owner_id: owner_id.clone(),
            fields: fields.clone(),
        };
        record.fields.updated_at = stamp(fields.updated_at, None);
        self.write_doc(&record).await?;

        Ok(RemoteAck {
            remote_id,
            updated_at: record.fields.updated_at,
        })
    }

    async fn update(&self, remote_id: &RemoteId, fields: &TaskFields) -> Result<RemoteAck> {
        validate_fields(fields)?;

        let path = self.doc_path(remote_id)?;
        let mut record = self
            .read_doc(&path)
            .await?
            .ok_or_else(|| Error::RemoteNotFound(remote_id.to_string()))?;

        record.fields.title = fields.title.clone();
        record.fields.description = fields.description.clone();
        record.fields.is_completed = fields.is_completed;
        record.fields.updated_at = stamp(fields.updated_at, Some(record.fields.updated_at));
        self.write_doc(&record).await?;

        Ok(RemoteAck {
            remote_id: remote_id.clone(),
            updated_at: record.fields.updated_at,
        })
    }

    async fn delete(&self, remote_id: &RemoteId) -> Result<()> {
        let path = self.doc_path(remote_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_modified_since(
        &self,
        owner_id: &OwnerId,
        cursor: Timestamp,
    ) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_doc = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_doc {
                continue;
            }

            match self.read_doc(&path).await {
                Ok(Some(record)) => {
                    if &record.owner_id == owner_id && record.updated_at() >= cursor {
                        records.push(record);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }

        sort_newest_first(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_common::time;
    use tempfile::TempDir;

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").unwrap()
    }

    fn fields(title: &str) -> TaskFields {
        let now = time::now();
        TaskFields {
            title: title.to_string(),
            description: Some("note".to_string()),
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_file_create_and_list() {
        let temp = TempDir::new().unwrap();
        let remote = FileRemote::new(temp.path()).unwrap();

        let ack = remote.create(&owner(), &fields("Buy milk")).await.unwrap();
        assert!(temp.path().join(format!("{}.json", ack.remote_id)).exists());

        let listed = remote
            .list_modified_since(&owner(), time::epoch())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].remote_id, ack.remote_id);
        assert_eq!(listed[0].fields.description.as_deref(), Some("note"));
    }

    #[tokio::test]
    async fn test_file_writes_are_stamped_on_write() {
        let temp = TempDir::new().unwrap();
        let remote = FileRemote::new(temp.path()).unwrap();
        let cursor = time::now();

        let mut stale = fields("Written offline");
        stale.updated_at = cursor - chrono::Duration::hours(1);
        let ack = remote.create(&owner(), &stale).await.unwrap();
        assert!(ack.updated_at >= cursor);

        let updated = remote.update(&ack.remote_id, &stale).await.unwrap();
        assert!(updated.updated_at > ack.updated_at);

        let listed = remote.list_modified_since(&owner(), cursor).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].updated_at(), updated.updated_at);
    }

    #[tokio::test]
    async fn test_file_update_missing() {
        let temp = TempDir::new().unwrap();
        let remote = FileRemote::new(temp.path()).unwrap();
        let missing = RemoteId::new("missing").unwrap();

        let result = remote.update(&missing, &fields("x")).await;
        assert!(matches!(result, Err(Error::RemoteNotFound(_))));
    }

    #[tokio::test]
    async fn test_file_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let remote = FileRemote::new(temp.path()).unwrap();
        let ack = remote.create(&owner(), &fields("Buy milk")).await.unwrap();

        remote.delete(&ack.remote_id).await.unwrap();
        remote.delete(&ack.remote_id).await.unwrap();
        let listed = remote
            .list_modified_since(&owner(), time::epoch())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_file_list_filters_owner() {
        let temp = TempDir::new().unwrap();
        let remote = FileRemote::new(temp.path()).unwrap();
        remote.create(&owner(), &fields("mine")).await.unwrap();
        remote
            .create(&OwnerId::new("other").unwrap(), &fields("theirs"))
            .await
            .unwrap();

        let listed = remote
            .list_modified_since(&owner(), time::epoch())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fields.title, "mine");
    }

    #[tokio::test]
    async fn test_file_rejects_path_like_ids() {
        let temp = TempDir::new().unwrap();
        let remote = FileRemote::new(temp.path()).unwrap();
        let sneaky = RemoteId::new("../escape").unwrap();
        assert!(remote.delete(&sneaky).await.unwrap_err().is_permanent());
    }
}
