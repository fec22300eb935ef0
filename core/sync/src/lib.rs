//! tasksync sync engine
//!
//! This crate keeps the local record store and the remote store converged:
//! - Local-first mutation API (create, update, delete, toggle)
//! - Push-then-pull reconciliation with last-write-wins merging
//! - Per-record failure accounting with an explicit retry cap
//! - Per-owner pass coalescing and a status surface
//! - A scheduler for change-triggered and periodic passes

pub mod auth;
pub mod conflict;
pub mod engine;
pub mod feed;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use auth::{Authenticator, StaticAuth};
pub use conflict::{resolve, Resolution, SkipReason};
pub use engine::{SyncConfig, SyncEngine};
pub use feed::TaskFeed;
pub use scheduler::{SchedulerHandle, SyncMode, SyncScheduler};
pub use state::{PushFailure, ReconcileReport, SyncStatus};
