use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::types::AuthStateChange;

pub type Handler = Arc<dyn Fn(&AuthStateChange) + Send + Sync>;

/// Session-change observers, called in registration order
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    handlers: Mutex<BTreeMap<u64, Handler>>,
}

impl Listeners {
    pub(crate) fn add(&self, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handler);
        tracing::debug!("Registered session listener {}", id);
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let removed = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            tracing::debug!("Removed session listener {}", id);
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn notify(&self, change: &AuthStateChange) {
        // Snapshot first so a handler may (un)subscribe without deadlocking
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for handler in handlers {
            handler(change);
        }
    }
}

/// Unsubscribe handle returned by `SessionManager::subscribe`.
/// Dropping it unsubscribes as well.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub(crate) fn new(id: u64, listeners: &Arc<Listeners>) -> Self {
        Self { id, listeners: Arc::downgrade(listeners) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
