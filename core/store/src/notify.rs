//! Change notification for committed store writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tasksync_common::LocalId;

/// Who issued a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Mutation API called by the application.
    Local,
    /// Reconciliation write-back or pulled remote data.
    Sync,
}

/// Event delivered to subscribers after a write is durable.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub origin: WriteOrigin,
    /// Records put or deleted by the write.
    pub changed: Vec<LocalId>,
}

/// Callback invoked for every committed write.
pub type ChangeCallback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, ChangeCallback>>,
}

/// Fan-out of store events to registered callbacks.
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Arc<Listeners>,
}

impl Notifier {
    /// Create a notifier with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; it stays registered until the handle is dropped.
    pub fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, callback);

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver an event to every subscriber.
    ///
    /// Callbacks run on the caller's thread with no store lock held, so they
    /// may read from the store.
    pub fn notify(&self, event: &StoreEvent) {
        let callbacks: Vec<ChangeCallback> = self
            .listeners
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Unsubscribe handle returned by `subscribe`.
#[must_use = "dropping the subscription unregisters the callback"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the callback now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&self.id);
        }
    }
}
