//! Task record model shared by the local store, remote client and engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::time::{self, Timestamp};
use crate::types::{LocalId, OwnerId, RemoteId};
use crate::Error;

/// Sync state of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Remote store holds the same version.
    Synced,
    /// Local create or edit waiting to be pushed.
    PendingPush,
    /// Delete requested, remote deletion not yet confirmed.
    PendingDelete,
}

impl SyncState {
    /// Stable name used in the persisted schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::PendingPush => "pending_push",
            SyncState::PendingDelete => "pending_delete",
        }
    }

    /// Whether the reconciliation push phase has work for this state.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncState::Synced)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncState::Synced),
            "pending_push" => Ok(SyncState::PendingPush),
            "pending_delete" => Ok(SyncState::PendingDelete),
            other => Err(Error::Serialization(format!("unknown sync state: {}", other))),
        }
    }
}

/// Document payload exchanged with the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    pub title: String,
    pub description: Option<String>,
    pub is_completed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Field changes requested through `update_task`.
///
/// `None` leaves a field untouched; `description: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub is_completed: Option<bool>,
}

impl TaskPatch {
    /// Patch that only sets the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Patch that only sets the completion flag.
    pub fn completed(is_completed: bool) -> Self {
        Self {
            is_completed: Some(is_completed),
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.is_completed.is_none()
    }
}

/// The unit of synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Local identifier, immutable.
    pub local_id: LocalId,
    /// Remote identifier; `None` until a push succeeds.
    pub remote_id: Option<RemoteId>,
    pub title: String,
    pub description: Option<String>,
    pub is_completed: bool,
    /// Owning principal, immutable.
    pub owner_id: OwnerId,
    /// Creation time, immutable.
    pub created_at: Timestamp,
    /// Bumped on every mutation; the conflict tie-breaker.
    pub updated_at: Timestamp,
    pub sync_state: SyncState,
    /// Permanent push faults since the last edit or successful push.
    pub failure_count: u32,
    /// Message of the last failed remote call.
    pub last_error: Option<String>,
}

impl TaskRecord {
    /// Create a record that has never been pushed.
    pub fn new_local(
        owner_id: OwnerId,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        let now = time::now();
        Self {
            local_id: LocalId::generate(),
            remote_id: None,
            title: title.into(),
            description,
            is_completed: false,
            owner_id,
            created_at: now,
            updated_at: now,
            sync_state: SyncState::PendingPush,
            failure_count: 0,
            last_error: None,
        }
    }

    /// Create a record mirroring a document pulled from the remote store.
    pub fn from_remote(owner_id: OwnerId, remote_id: RemoteId, fields: &TaskFields) -> Self {
        Self {
            local_id: LocalId::generate(),
            remote_id: Some(remote_id),
            title: fields.title.clone(),
            description: fields.description.clone(),
            is_completed: fields.is_completed,
            owner_id,
            created_at: fields.created_at,
            updated_at: fields.updated_at,
            sync_state: SyncState::Synced,
            failure_count: 0,
            last_error: None,
        }
    }

    /// Payload to send to the remote store.
    pub fn fields(&self) -> TaskFields {
        TaskFields {
            title: self.title.clone(),
            description: self.description.clone(),
            is_completed: self.is_completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Whether the record appears in listings shown to the user.
    pub fn is_visible(&self) -> bool {
        self.sync_state != SyncState::PendingDelete
    }

    /// Whether the push phase should stop resending this payload, be it a
    /// create, an update or a delete.
    pub fn is_stalled(&self, max_permanent_failures: u32) -> bool {
        self.sync_state.is_pending() && self.failure_count >= max_permanent_failures
    }

    /// Apply a local edit.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(is_completed) = patch.is_completed {
            self.is_completed = is_completed;
        }
        self.updated_at = time::bump(self.updated_at);
        self.sync_state = SyncState::PendingPush;
        self.failure_count = 0;
    }

    /// Mark as waiting for remote deletion.
    pub fn mark_pending_delete(&mut self) {
        self.updated_at = time::bump(self.updated_at);
        self.sync_state = SyncState::PendingDelete;
        self.failure_count = 0;
    }

    /// Mark as confirmed by the remote store.
    pub fn mark_synced(&mut self, remote_id: RemoteId, remote_updated_at: Timestamp) {
        self.remote_id = Some(remote_id);
        if remote_updated_at > self.updated_at {
            self.updated_at = remote_updated_at;
        }
        self.sync_state = SyncState::Synced;
        self.failure_count = 0;
        self.last_error = None;
    }

    /// Record a failed remote call without changing the sync state.
    pub fn mark_failed(&mut self, error: &Error) {
        if error.is_permanent() {
            self.failure_count += 1;
        }
        self.last_error = Some(error.to_string());
    }

    /// Overwrite the mutable fields with a newer remote version.
    pub fn overwrite_from(&mut self, fields: &TaskFields) {
        self.title = fields.title.clone();
        self.description = fields.description.clone();
        self.is_completed = fields.is_completed;
        self.updated_at = fields.updated_at;
        self.sync_state = SyncState::Synced;
        self.failure_count = 0;
        self.last_error = None;
    }
}
