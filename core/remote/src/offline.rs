//! Remote that is never reachable.

use async_trait::async_trait;

use tasksync_common::{Error, OwnerId, RemoteId, Result, TaskFields, Timestamp};

use crate::client::{RemoteAck, RemoteRecord, RemoteStore};

/// Remote client for working offline: every call fails transiently, so
/// mutations stay local and pending until a real remote is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineRemote;

fn offline() -> Error {
    Error::RemoteUnavailable("working offline".to_string())
}

#[async_trait]
impl RemoteStore for OfflineRemote {
    fn name(&self) -> &str {
        "offline"
    }

    async fn create(&self, _owner_id: &OwnerId, _fields: &TaskFields) -> Result<RemoteAck> {
        Err(offline())
    }

    async fn update(&self, _remote_id: &RemoteId, _fields: &TaskFields) -> Result<RemoteAck> {
        Err(offline())
    }

    async fn delete(&self, _remote_id: &RemoteId) -> Result<()> {
        Err(offline())
    }

    async fn list_modified_since(
        &self,
        _owner_id: &OwnerId,
        _cursor: Timestamp,
    ) -> Result<Vec<RemoteRecord>> {
        Err(offline())
    }
}
