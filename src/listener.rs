// Leadership event subscribers, deduplicated by identity

use crate::event::LeadershipEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Receives every leadership event raised on this node, local or gossiped.
///
/// Delivery order across listeners is unspecified.
pub trait LeadershipEventListener: Send + Sync {
    fn event(&self, event: &LeadershipEvent);
}

impl<F> LeadershipEventListener for F
where
    F: Fn(&LeadershipEvent) + Send + Sync,
{
    fn event(&self, event: &LeadershipEvent) {
        self(event)
    }
}

/// Address of the listener object, ignoring the vtable half of the fat pointer.
fn identity(listener: &Arc<dyn LeadershipEventListener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Set of listeners keyed by reference identity, not value equality.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<usize, Arc<dyn LeadershipEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if this exact object was already registered.
    pub fn add(&self, listener: Arc<dyn LeadershipEventListener>) -> bool {
        let key = identity(&listener);
        let mut listeners = self.listeners.write();
        if listeners.contains_key(&key) {
            return false;
        }
        listeners.insert(key, listener);
        true
    }

    /// Returns `false` if the object was not registered.
    pub fn remove(&self, listener: &Arc<dyn LeadershipEventListener>) -> bool {
        self.listeners.write().remove(&identity(listener)).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Synchronous fan-out to every registered listener.
    ///
    /// Works on a snapshot so listeners may add or remove listeners from
    /// inside their callback without deadlocking.
    pub fn notify(&self, event: &LeadershipEvent) {
        let snapshot: Vec<Arc<dyn LeadershipEventListener>> =
            self.listeners.read().values().cloned().collect();

        debug!("Delivering {} to {} listeners", event, snapshot.len());
        for listener in snapshot {
            listener.event(event);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
