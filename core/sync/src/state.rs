//! Status surface and pass summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use tasksync_common::{Error, LocalId};

/// Observable sync status for the signed-in owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// A reconciliation pass is running.
    pub is_loading: bool,
    /// Summary of the last pass's problems, if any.
    pub last_error: Option<String>,
    /// Records with at least one permanent push fault.
    pub failed_records: usize,
    /// When the last pass finished.
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

/// A remote operation that failed for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFailure {
    pub local_id: LocalId,
    pub message: String,
    /// Retrying the same payload is not expected to succeed.
    pub permanent: bool,
}

impl PushFailure {
    pub fn new(local_id: LocalId, error: &Error) -> Self {
        Self {
            local_id,
            message: error.to_string(),
            permanent: error.is_permanent(),
        }
    }
}

/// Non-fatal summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records created or updated remotely.
    pub pushed: usize,
    /// Records whose remote deletion was confirmed and which were removed.
    pub deleted: usize,
    /// Remote documents mirrored as new local records.
    pub pulled_created: usize,
    /// Local records overwritten by a newer remote version.
    pub pulled_updated: usize,
    /// Pulled documents left alone (already applied, local newer, pending delete).
    pub skipped: usize,
    /// Records held back after reaching the permanent failure cap.
    pub stalled: usize,
    /// Push failures of this pass plus permanent ones deferred from
    /// background pushes since the previous pass.
    pub failures: Vec<PushFailure>,
    /// Why the pull phase could not run.
    pub pull_error: Option<String>,
    /// Another pass for the same owner was already running.
    pub coalesced: bool,
    pub duration: Duration,
}

impl ReconcileReport {
    pub(crate) fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    /// Nothing failed, stalled or was left unpulled.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.pull_error.is_none() && self.stalled == 0
    }

    /// Failures that will not go away by retrying.
    pub fn permanent_failures(&self) -> impl Iterator<Item = &PushFailure> {
        self.failures.iter().filter(|f| f.permanent)
    }

    /// One-line description of what went wrong, for the status surface.
    pub fn error_summary(&self) -> Option<String> {
        if let Some(pull_error) = &self.pull_error {
            return Some(format!("Pull failed: {}", pull_error));
        }
        match self.failures.first() {
            Some(first) if self.failures.len() == 1 => {
                Some(format!("Failed to sync {}: {}", first.local_id, first.message))
            }
            Some(first) => Some(format!(
                "{} records failed to sync; first: {}",
                self.failures.len(),
                first.message
            )),
            None if self.stalled > 0 => Some(format!(
                "{} records stalled after repeated rejections",
                self.stalled
            )),
            None => None,
        }
    }
}
