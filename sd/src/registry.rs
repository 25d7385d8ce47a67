//! SubscriberRegistry - per-key observer store
//!
//! Any component instance can subscribe a notification callback for a key;
//! the owner broadcasts to every subscriber of that key after a state
//! transition. Callbacks are invoked outside the registry lock, so a callback
//! may subscribe, unsubscribe, or trigger further notifications.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::lock;

/// Notification callback
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Token returned by [`SubscriberRegistry::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Per-key observer store
pub struct SubscriberRegistry<K> {
    subscribers: Mutex<HashMap<K, Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
}

impl<K: Eq + Hash + Clone + Debug> SubscriberRegistry<K> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for `key`
    pub fn subscribe(&self, key: K, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(?key, ?id, "subscribe: called");
        lock(&self.subscribers)
            .entry(key)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback; returns false if it was not registered
    pub fn unsubscribe(&self, key: &K, id: SubscriptionId) -> bool {
        debug!(?key, ?id, "unsubscribe: called");
        let mut subscribers = lock(&self.subscribers);
        let Some(list) = subscribers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub_id, _)| *sub_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(key);
        }
        removed
    }

    /// Invoke every callback registered for `key`, in registration order
    ///
    /// Returns the number of callbacks invoked.
    pub fn notify(&self, key: &K) -> usize {
        let callbacks: Vec<Callback> = lock(&self.subscribers)
            .get(key)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        debug!(?key, count = callbacks.len(), "notify: broadcasting");
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }

    /// Number of callbacks registered for `key`
    pub fn subscriber_count(&self, key: &K) -> usize {
        lock(&self.subscribers).get(key).map(Vec::len).unwrap_or(0)
    }

    /// True if no key has any subscriber
    pub fn is_empty(&self) -> bool {
        lock(&self.subscribers).is_empty()
    }
}

impl<K: Eq + Hash + Clone + Debug> Default for SubscriberRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
