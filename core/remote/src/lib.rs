//! Remote store client abstraction for tasksync.
//!
//! This module provides a trait-based interface over the remote document
//! store that acts as the source of truth, a retry/timeout decorator, and a
//! provider registry for resolving a client by name.
//!
//! # Design Principles
//! - Async operations: every call may suspend on network I/O
//! - Classified faults: transient (`RemoteUnavailable`) vs permanent
//!   (`RemoteRejected`, `RemoteNotFound`), so callers know what to retry
//! - No shared mutable state beyond what a session needs

pub mod client;
pub mod file;
pub mod memory;
pub mod offline;
pub mod registry;
pub mod retry;

pub use client::{RemoteAck, RemoteRecord, RemoteStore};
pub use file::FileRemote;
pub use memory::{CallCounts, FailMode, MemoryRemote};
pub use offline::OfflineRemote;
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use retry::{retry, RetryConfig, RetryExecutor, RetryingRemote};
