//! Local record store for tasksync.
//!
//! The store is the durable, synchronous half of the sync pair: every
//! mutation lands here first, and the sync engine reads pending records back
//! out of it.
//!
//! # Design Principles
//! - Synchronous access: local reads and writes never suspend
//! - Scoped transactions: multi-field updates commit atomically
//! - Change notification: observers hear about every committed write,
//!   tagged with the origin of the write

pub mod memory;
pub mod notify;
pub mod record_store;
pub mod sqlite;

pub use memory::MemoryRecordStore;
pub use notify::{ChangeCallback, Notifier, StoreEvent, Subscription, WriteOrigin};
pub use record_store::{RecordStore, StoreTxn};
pub use sqlite::SqliteRecordStore;
