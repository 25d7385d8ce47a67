//! AsyncCache - per-key async data with suspend/resume semantics
//!
//! One instance belongs to one render tree (one request on the server, one
//! page on the client). Every transition replaces the key's entry wholesale
//! and then notifies the key's subscribers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::entry::{CacheEntry, Fetcher, Operation, Settled};
use crate::error::{SsrError, SsrResult};
use crate::gate::ConvergenceGate;
use crate::lock;
use crate::registry::{SubscriberRegistry, SubscriptionId};
use crate::render::{Interrupt, Mode, RenderResult, Suspension};

struct CacheInner {
    mode: Mode,
    values: Mutex<BTreeMap<String, Arc<CacheEntry>>>,
    registry: SubscriberRegistry<String>,
    gate: ConvergenceGate,
    generation: AtomicU64,
    hydrated: AtomicBool,
    emitter: Mutex<Option<String>>,
}

/// Handle to a render tree's data cache; clones share the same state
#[derive(Clone)]
pub struct AsyncCache {
    inner: Arc<CacheInner>,
}

impl AsyncCache {
    pub fn new(mode: Mode) -> Self {
        debug!(?mode, "AsyncCache::new: called");
        Self {
            inner: Arc::new(CacheInner {
                mode,
                values: Mutex::new(BTreeMap::new()),
                registry: SubscriberRegistry::new(),
                gate: ConvergenceGate::new(),
                generation: AtomicU64::new(0),
                hydrated: AtomicBool::new(false),
                emitter: Mutex::new(None),
            }),
        }
    }

    pub fn server() -> Self {
        Self::new(Mode::Server)
    }

    pub fn client() -> Self {
        Self::new(Mode::Client)
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// True if both handles refer to the same cache
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current entry for `key`; never triggers work
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        lock(&self.inner.values).get(key).cloned()
    }

    /// Snapshot of every entry, ordered by key
    pub fn entries(&self) -> Vec<(String, Arc<CacheEntry>)> {
        lock(&self.inner.values)
            .iter()
            .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.inner.values).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.values).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.values).is_empty()
    }

    /// Be notified on every transition of `key`
    pub fn subscribe(&self, key: &str, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.inner.registry.subscribe(key.to_string(), callback)
    }

    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        self.inner.registry.unsubscribe(&key.to_string(), id)
    }

    pub fn gate(&self) -> &ConvergenceGate {
        &self.inner.gate
    }

    /// The data phase has finished (drained on the server, hydrated on the client)
    pub fn is_finished(&self) -> bool {
        self.inner.gate.is_finished()
    }

    pub fn wait_finished(&self) -> Suspension {
        self.inner.gate.wait()
    }

    /// Start a fetch for `key`, overwriting any existing entry
    ///
    /// Subscribers see the loading entry before this returns. The operation is
    /// spawned on the current tokio runtime, if any, so it settles even when
    /// nothing awaits it.
    pub fn start(&self, key: &str, fetcher: Fetcher) -> Operation {
        let (_, op) = self.begin(key, fetcher);
        op
    }

    fn begin(&self, key: &str, fetcher: Fetcher) -> (Arc<CacheEntry>, Operation) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%key, generation, "start: called");

        let pending = fetcher();
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let settle_key = key.to_string();
        let settle_fetcher = Arc::clone(&fetcher);
        let op: Operation = async move {
            let result = pending.await;
            if let Some(inner) = weak.upgrade() {
                AsyncCache { inner }.settle(&settle_key, settle_fetcher, generation, &result);
            }
            result
        }
        .boxed()
        .shared();

        let entry = Arc::new(CacheEntry::loading(fetcher, op.clone(), generation));
        lock(&self.inner.values).insert(key.to_string(), Arc::clone(&entry));
        if self.inner.mode == Mode::Server {
            self.inner.gate.register(op.clone());
        }
        self.inner.registry.notify(&key.to_string());
        spawn(op.clone());
        (entry, op)
    }

    fn settle(&self, key: &str, fetcher: Fetcher, generation: u64, result: &Settled) {
        {
            let mut values = lock(&self.inner.values);
            let current = values.get(key).map(|entry| entry.generation);
            if current.is_some_and(|current| current != generation) {
                debug!(%key, generation, ?current, "settle: superseded, dropping result");
                return;
            }
            let entry = CacheEntry::settled(result.clone(), Some(fetcher), generation);
            values.insert(key.to_string(), Arc::new(entry));
        }
        match result {
            Ok(_) => debug!(%key, generation, "settle: fetch succeeded"),
            Err(err) => warn!(%key, generation, error = %err, "settle: fetch failed"),
        }
        self.inner.registry.notify(&key.to_string());
    }

    /// Read-and-subscribe entry point for a rendering component
    ///
    /// On the server a missing or loading entry suspends the caller on the
    /// pending fetch. On the client the loading entry is returned as is. A
    /// settled entry without a fetcher (restored from a payload) adopts the
    /// caller's fetcher for later reloads without fetching.
    pub fn ensure(&self, key: &str, fetcher: Fetcher) -> RenderResult<Arc<CacheEntry>> {
        let Some(entry) = self.get(key) else {
            let (entry, op) = self.begin(key, fetcher);
            if self.inner.mode == Mode::Server {
                return Err(Interrupt::Suspended(Suspension::on(&op)));
            }
            return Ok(entry);
        };

        if entry.loading {
            let server = self.inner.mode == Mode::Server;
            if let Some(suspension) = entry.inflight().filter(|_| server).map(Suspension::on) {
                return Err(Interrupt::Suspended(suspension));
            }
            return Ok(entry);
        }

        if entry.fetcher().is_none() {
            debug!(%key, "ensure: attaching fetcher to restored entry");
            let attached = Arc::new(entry.with_fetcher(fetcher));
            let mut values = lock(&self.inner.values);
            if values.get(key).is_some_and(|current| Arc::ptr_eq(current, &entry)) {
                values.insert(key.to_string(), Arc::clone(&attached));
            }
            return Ok(attached);
        }

        Ok(entry)
    }

    /// Fetch `key` again with the supplied fetcher, or the one last stored
    ///
    /// Fails with [`SsrError::MissingFetcher`] when neither exists; the cache
    /// is left untouched in that case.
    pub fn reload(&self, key: &str, fetcher: Option<Fetcher>) -> SsrResult<Operation> {
        debug!(%key, explicit = fetcher.is_some(), "reload: called");
        let fetcher = fetcher
            .or_else(|| self.get(key).and_then(|entry| entry.fetcher().cloned()))
            .ok_or_else(|| SsrError::MissingFetcher(key.to_string()))?;
        Ok(self.start(key, fetcher))
    }

    /// Install settled entries from a payload
    pub(crate) fn seed(&self, entries: impl IntoIterator<Item = (String, CacheEntry)>) -> usize {
        let mut values = lock(&self.inner.values);
        let mut count = 0;
        for (key, entry) in entries {
            values.insert(key, Arc::new(entry));
            count += 1;
        }
        count
    }

    /// Set the one-shot hydration flag; true only for the first caller
    pub(crate) fn mark_hydrated(&self) -> bool {
        !self.inner.hydrated.swap(true, Ordering::SeqCst)
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.hydrated.load(Ordering::SeqCst)
    }

    /// Reserve payload emission for the instance `id`
    ///
    /// The first emitter wins; later emitters render nothing.
    pub(crate) fn claim_emitter(&self, id: &str) -> bool {
        let mut emitter = lock(&self.inner.emitter);
        match emitter.as_deref() {
            Some(owner) => owner == id,
            None => {
                info!(%id, "claim_emitter: payload emitter claimed");
                *emitter = Some(id.to_string());
                true
            }
        }
    }
}

/// Drive `op` to completion on the ambient runtime
fn spawn(op: Operation) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let _ = op.await;
            });
        }
        Err(_) => debug!("spawn: no tokio runtime, operation settles when awaited"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{FetchError, fetcher};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counted(value: i64, calls: &Arc<AtomicUsize>) -> Fetcher {
        let calls = Arc::clone(calls);
        fetcher(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, FetchError>(value) }
        })
    }

    #[tokio::test]
    async fn test_start_notifies_loading_then_settled() {
        let cache = AsyncCache::client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = cache.clone();
        let sink = Arc::clone(&seen);
        cache.subscribe("k", move || {
            let entry = observer.get("k").unwrap();
            // No observation may carry both sides
            assert!(entry.data.is_none() || entry.error.is_none());
            lock(&sink).push(entry.loading);
        });

        let op = cache.start("k", fetcher(|| async { Ok::<_, FetchError>(5) }));
        assert_eq!(*lock(&seen), vec![true]);

        assert_eq!(op.await, Ok(json!(5)));
        assert_eq!(*lock(&seen), vec![true, false]);
        let entry = cache.get("k").unwrap();
        assert_eq!(entry.data, Some(json!(5)));
        assert!(entry.error.is_none());
        assert!(!entry.loading);
        assert!(entry.fetcher().is_some());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_raised() {
        let cache = AsyncCache::server();
        let op = cache.start("k", fetcher(|| async { Err::<i64, _>("boom") }));
        assert!(op.await.is_err());
        let entry = cache.get("k").unwrap();
        assert!(entry.data.is_none());
        assert_eq!(entry.error, Some(FetchError::from("boom")));
        assert!(!entry.loading);
    }

    #[tokio::test]
    async fn test_start_clears_previous_result() {
        let cache = AsyncCache::client();
        cache.start("k", fetcher(|| async { Ok::<_, FetchError>(1) })).await.unwrap();
        let (_tx, rx) = tokio::sync::oneshot::channel::<i64>();
        let rx = Arc::new(Mutex::new(Some(rx)));
        cache.start(
            "k",
            fetcher(move || {
                let rx = lock(&rx).take();
                async move {
                    match rx {
                        Some(rx) => rx.await.map_err(|_| FetchError::from("closed")),
                        None => Err(FetchError::from("used")),
                    }
                }
            }),
        );
        let entry = cache.get("k").unwrap();
        assert!(entry.loading);
        assert!(entry.data.is_none());
        assert!(entry.error.is_none());
    }

    #[tokio::test]
    async fn test_server_ensure_suspends_then_reads() {
        let cache = AsyncCache::server();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.ensure("k", counted(3, &calls));
        let Err(Interrupt::Suspended(suspension)) = first else {
            panic!("first server read must suspend");
        };
        assert_eq!(cache.gate().outstanding(), 1);
        suspension.await;

        let entry = cache.ensure("k", counted(3, &calls)).unwrap();
        assert_eq!(entry.data, Some(json!(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_ensure_while_loading_suspends_on_same_fetch() {
        let cache = AsyncCache::server();
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(cache.ensure("k", counted(1, &calls)).unwrap_err().is_suspended());
        assert!(cache.ensure("k", counted(1, &calls)).unwrap_err().is_suspended());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_ensure_returns_loading_entry() {
        let cache = AsyncCache::client();
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = cache.ensure("k", counted(9, &calls)).unwrap();
        assert!(entry.loading);
        assert_eq!(cache.gate().outstanding(), 0);
        entry.inflight().cloned().unwrap().await.unwrap();
        assert_eq!(cache.get("k").unwrap().data, Some(json!(9)));
    }

    #[tokio::test]
    async fn test_ensure_attaches_fetcher_to_restored_entry() {
        let cache = AsyncCache::client();
        cache.seed([("k".to_string(), CacheEntry::hydrated(Some(json!(1)), None))]);
        let calls = Arc::new(AtomicUsize::new(0));

        let entry = cache.ensure("k", counted(2, &calls)).unwrap();
        assert_eq!(entry.data, Some(json!(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cache.reload("k", None).unwrap().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("k").unwrap().data, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_reload_without_fetcher_is_usage_error() {
        let cache = AsyncCache::client();
        let err = cache.reload("never", None).unwrap_err();
        assert!(matches!(err, SsrError::MissingFetcher(ref key) if key == "never"));
        assert!(cache.get("never").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_reload_prefers_explicit_fetcher() {
        let cache = AsyncCache::client();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.start("k", counted(1, &calls)).await.unwrap();
        let other = Arc::new(AtomicUsize::new(0));
        cache.reload("k", Some(counted(7, &other))).unwrap().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("k").unwrap().data, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_superseded_settlement_is_dropped() {
        let cache = AsyncCache::client();
        let (slow_tx, slow_rx) = tokio::sync::oneshot::channel::<i64>();
        let slow_rx = Arc::new(Mutex::new(Some(slow_rx)));
        let slow = cache.start(
            "k",
            fetcher(move || {
                let rx = lock(&slow_rx).take();
                async move {
                    match rx {
                        Some(rx) => rx.await.map_err(|_| FetchError::from("closed")),
                        None => Err(FetchError::from("used")),
                    }
                }
            }),
        );
        let fast = cache.start("k", fetcher(|| async { Ok::<_, FetchError>(2) }));
        fast.await.unwrap();
        slow_tx.send(1).unwrap();
        slow.await.unwrap();
        assert_eq!(cache.get("k").unwrap().data, Some(json!(2)));
    }

    #[test]
    fn test_claim_emitter_first_wins() {
        let cache = AsyncCache::server();
        assert!(cache.claim_emitter(":r3-0:"));
        assert!(cache.claim_emitter(":r3-0:"));
        assert!(!cache.claim_emitter(":r4-0:"));
    }
}
