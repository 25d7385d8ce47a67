//! HeadStore - ordered head groups shared by one render tree

use std::sync::{Arc, Mutex};

use ssrdata::{Signal, SubscriberRegistry, SubscriptionId, Suspension, lock};
use tracing::debug;

use super::fragment::{HeadFragment, HeadGroup};

struct StoreInner {
    groups: Mutex<Vec<Arc<HeadGroup>>>,
    registry: SubscriberRegistry<()>,
    finished: Signal,
}

/// Groups in mount order, plus a "every declaring subtree rendered" signal
///
/// Groups are identified by their `Arc`, so two groups with identical
/// fragments are still removed independently.
#[derive(Clone)]
pub struct HeadStore {
    inner: Arc<StoreInner>,
}

impl HeadStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                groups: Mutex::new(Vec::new()),
                registry: SubscriberRegistry::new(),
                finished: Signal::new(),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Append a group; the returned handle removes it again
    pub fn push(&self, group: impl Into<HeadGroup>) -> Arc<HeadGroup> {
        let group = Arc::new(group.into());
        debug!(fragments = group.len(), "push: called");
        lock(&self.inner.groups).push(Arc::clone(&group));
        self.inner.registry.notify(&());
        group
    }

    /// Remove exactly `group`; returns false if it is not in the store
    pub fn remove(&self, group: &Arc<HeadGroup>) -> bool {
        let removed = {
            let mut groups = lock(&self.inner.groups);
            match groups.iter().position(|g| Arc::ptr_eq(g, group)) {
                Some(index) => {
                    groups.remove(index);
                    true
                }
                None => false,
            }
        };
        debug!(removed, "remove: called");
        if removed {
            self.inner.registry.notify(&());
        }
        removed
    }

    /// Replace the group list with `f(current)`
    ///
    /// `f` runs without the store locked and may read the store; the list is
    /// empty while it runs.
    pub fn dispatch(&self, f: impl FnOnce(Vec<Arc<HeadGroup>>) -> Vec<Arc<HeadGroup>>) {
        let current = std::mem::take(&mut *lock(&self.inner.groups));
        let next = f(current);
        *lock(&self.inner.groups) = next;
        self.inner.registry.notify(&());
    }

    /// Drop every group
    pub fn reset(&self) {
        debug!("reset: called");
        self.dispatch(|_| Vec::new());
    }

    pub fn snapshot(&self) -> Vec<Arc<HeadGroup>> {
        lock(&self.inner.groups).clone()
    }

    /// All fragments in group order
    pub fn flatten(&self) -> Vec<HeadFragment> {
        lock(&self.inner.groups)
            .iter()
            .flat_map(|group| group.fragments().iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.groups).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.groups).is_empty()
    }

    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.inner.registry.subscribe((), callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.registry.unsubscribe(&(), id)
    }

    pub fn mark_finished(&self) -> bool {
        self.inner.finished.release()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.is_released()
    }

    pub fn wait(&self) -> Suspension {
        self.inner.finished.wait()
    }
}

impl Default for HeadStore {
    fn default() -> Self {
        Self::new()
    }
}
