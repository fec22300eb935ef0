//! Common utilities and types shared across the tasksync crates.
//!
//! This crate provides the fault taxonomy, identifier newtypes and the task
//! record model that the local store, the remote client and the sync engine
//! all agree on.

pub mod error;
pub mod task;
pub mod time;
pub mod types;

pub use error::{Error, Result};
pub use task::{SyncState, TaskFields, TaskPatch, TaskRecord};
pub use time::Timestamp;
pub use types::{LocalId, OwnerId, RemoteId};
