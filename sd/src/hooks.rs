//! Component-facing entry points

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::AsyncCache;
use crate::entry::{FetchError, Fetcher, Operation};
use crate::error::SsrResult;
use crate::hydration::{encode, escape_payload, script_tag};
use crate::render::{Interrupt, RenderResult, RenderScope, Teardown};

/// Reload handle for one key of one cache
///
/// Two handles are equal when they target the same key of the same cache,
/// so a component can hold one across renders. A handle returned by
/// [`use_ssr`] carries the producer of the render that returned it.
#[derive(Clone)]
pub struct Reload {
    cache: AsyncCache,
    key: String,
    fetcher: Option<Fetcher>,
}

impl Reload {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fetch again with this handle's producer, or else the one stored for the key
    pub fn trigger(&self) -> SsrResult<Operation> {
        self.cache.reload(&self.key, self.fetcher.clone())
    }

    /// Fetch again with `fetcher`, which replaces the stored producer
    pub fn trigger_with(&self, fetcher: Fetcher) -> SsrResult<Operation> {
        self.cache.reload(&self.key, Some(fetcher))
    }
}

impl PartialEq for Reload {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.cache.ptr_eq(&other.cache)
    }
}

impl Eq for Reload {}

impl fmt::Debug for Reload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reload").field("key", &self.key).finish()
    }
}

/// What a component sees for its key
#[derive(Debug, Clone)]
pub struct SsrState<T> {
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub loading: bool,
    pub reload: Reload,
}

/// Read `key` (or an id stable for this call site) and fetch it if needed
///
/// On the server this suspends until the value is present. On the client the
/// slot is re-rendered whenever the key changes, and a value restored from
/// the payload is used without fetching. A stored value that does not
/// deserialize as `T` is reported as an error.
pub fn use_ssr<T: DeserializeOwned>(
    scope: &mut RenderScope<'_>,
    cache: &AsyncCache,
    fetcher: Fetcher,
    key: Option<&str>,
) -> RenderResult<SsrState<T>> {
    let id = scope.use_id();
    let key = key.map(str::to_string).unwrap_or(id);

    if scope.is_server() {
        // Keep hook positions identical to the client pass
        scope.use_mount(|| None);
    } else {
        let watched = cache.clone();
        let watch_key = key.clone();
        scope.use_subscription(move |invalidate| {
            let sub = watched.subscribe(&watch_key, move || invalidate());
            Box::new(move || {
                watched.unsubscribe(&watch_key, sub);
            }) as Teardown
        });
    }

    let entry = cache.ensure(&key, Arc::clone(&fetcher))?;
    let (data, error) = match &entry.data {
        Some(value) => match serde_json::from_value::<T>(value.clone()) {
            Ok(data) => (Some(data), entry.error.clone()),
            Err(err) => {
                warn!(%key, error = %err, "use_ssr: stored value has unexpected shape");
                (None, Some(FetchError::from(err)))
            }
        },
        None => (None, entry.error.clone()),
    };

    Ok(SsrState {
        data,
        error,
        loading: entry.loading,
        reload: Reload {
            fetcher: Some(fetcher),
            ..use_reload(cache, &key)
        },
    })
}

/// Reload handle for `key`; usable outside the component that reads it
pub fn use_reload(cache: &AsyncCache, key: &str) -> Reload {
    Reload {
        cache: cache.clone(),
        key: key.to_string(),
        fetcher: None,
    }
}

/// Suspend a server render until the data phase has finished
pub fn ssr_wait(scope: &RenderScope<'_>, cache: &AsyncCache) -> RenderResult<()> {
    if scope.is_server() && !cache.is_finished() {
        debug!("ssr_wait: waiting for data phase");
        return Err(Interrupt::Suspended(cache.wait_finished()));
    }
    Ok(())
}

/// Emit the data payload script for `cache`
///
/// Only the first emitter rendered against a cache produces output. On the
/// server it first drains every outstanding fetch, suspending as many rounds
/// as it takes.
pub fn data_render(scope: &mut RenderScope<'_>, cache: &AsyncCache, anchor: &str) -> RenderResult<String> {
    let id = scope.use_id();
    if !cache.claim_emitter(&id) {
        debug!(%id, "data_render: payload already emitted by another instance");
        return Ok(String::new());
    }

    if scope.is_server() {
        cache.gate().drain()?;
    } else {
        cache.gate().finish();
    }

    let body = escape_payload(&encode(cache)?);
    Ok(script_tag(anchor, &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::fetcher;
    use crate::error::SsrError;
    use crate::hydration::{DATA_ANCHOR, HtmlDocument, hydrate};
    use crate::lock;
    use crate::render::{Mode, Root};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counted(value: i64, calls: &Arc<AtomicUsize>) -> Fetcher {
        let calls = Arc::clone(calls);
        fetcher(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, FetchError>(value) }
        })
    }

    #[tokio::test]
    async fn test_server_render_waits_for_data() {
        let cache = AsyncCache::server();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut root = Root::new(Mode::Server);
        let (c, n) = (cache.clone(), Arc::clone(&calls));
        root.push(move |scope| {
            let state = use_ssr::<i64>(scope, &c, counted(42, &n), Some("answer"))?;
            Ok(format!("<p>{}</p>", state.data.unwrap_or_default()))
        });
        assert_eq!(root.render().await.unwrap(), "<p>42</p>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_key_hydrates_without_fetch() {
        let server = AsyncCache::server();
        let mut root = Root::new(Mode::Server);
        let c = server.clone();
        root.push(move |scope| {
            let state = use_ssr::<String>(scope, &c, fetcher(|| async { Ok::<_, FetchError>("hi") }), None)?;
            Ok(state.data.unwrap_or_default())
        });
        let c = server.clone();
        root.push(move |scope| data_render(scope, &c, DATA_ANCHOR));
        let html = root.render().await.unwrap();
        assert!(html.starts_with("hi<script"));

        let client = AsyncCache::client();
        assert_eq!(hydrate(&client, &HtmlDocument::new(html), DATA_ANCHOR), 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut root = Root::new(Mode::Client);
        let (c, n, sink) = (client.clone(), Arc::clone(&calls), Arc::clone(&seen));
        root.push(move |scope| {
            let calls = Arc::clone(&n);
            let produce = fetcher(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, FetchError>("fresh") }
            });
            let state = use_ssr::<String>(scope, &c, produce, None)?;
            lock(&sink).push((state.data.clone(), state.loading));
            Ok(state.data.unwrap_or_default())
        });
        assert_eq!(root.render().await.unwrap(), "hi");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*lock(&seen), vec![(Some("hi".to_string()), false)]);
    }

    #[tokio::test]
    async fn test_client_reload_rerenders_slot() {
        let cache = AsyncCache::client();
        let calls = Arc::new(AtomicUsize::new(0));
        let reload: Arc<Mutex<Option<Reload>>> = Arc::new(Mutex::new(None));
        let mut root = Root::new(Mode::Client);
        let (c, n, handle) = (cache.clone(), Arc::clone(&calls), Arc::clone(&reload));
        root.push(move |scope| {
            let state = use_ssr::<i64>(scope, &c, counted(5, &n), Some("k"))?;
            *lock(&handle) = Some(state.reload.clone());
            Ok(if state.loading { "loading".to_string() } else { state.data.unwrap_or_default().to_string() })
        });
        assert_eq!(root.render().await.unwrap(), "loading");

        cache.get("k").unwrap().inflight().cloned().unwrap().await.unwrap();
        assert!(root.is_dirty());
        assert_eq!(root.rerender().await.unwrap(), "5");

        let trigger = lock(&reload).clone().unwrap();
        trigger.trigger().unwrap().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(root.rerender().await.unwrap(), "5");
    }

    #[tokio::test]
    async fn test_reload_uses_latest_render_producer() {
        let cache = AsyncCache::client();
        let current = Arc::new(AtomicI64::new(1));
        let reload: Arc<Mutex<Option<Reload>>> = Arc::new(Mutex::new(None));
        let mut root = Root::new(Mode::Client);
        let (c, value, handle) = (cache.clone(), Arc::clone(&current), Arc::clone(&reload));
        root.push(move |scope| {
            let snapshot = value.load(Ordering::SeqCst);
            let produce = fetcher(move || async move { Ok::<_, FetchError>(snapshot) });
            let state = use_ssr::<i64>(scope, &c, produce, Some("n"))?;
            *lock(&handle) = Some(state.reload.clone());
            Ok(state.data.map(|n| n.to_string()).unwrap_or_default())
        });
        root.render().await.unwrap();
        cache.get("n").unwrap().inflight().cloned().unwrap().await.unwrap();
        assert_eq!(root.rerender().await.unwrap(), "1");

        // A later render supplies a new producer; the cached value stays
        current.store(2, Ordering::SeqCst);
        assert_eq!(root.render().await.unwrap(), "1");

        let trigger = lock(&reload).clone().unwrap();
        assert_eq!(trigger.trigger().unwrap().await.unwrap(), serde_json::json!(2));
        assert_eq!(root.rerender().await.unwrap(), "2");

        // A handle made from the key alone reuses the producer last stored
        current.store(3, Ordering::SeqCst);
        use_reload(&cache, "n").trigger().unwrap().await.unwrap();
        assert_eq!(cache.get("n").unwrap().data, Some(serde_json::json!(2)));
    }

    #[test]
    fn test_reload_equality_by_key_and_cache() {
        let cache = AsyncCache::client();
        let other = AsyncCache::client();
        assert_eq!(use_reload(&cache, "k"), use_reload(&cache.clone(), "k"));
        assert_ne!(use_reload(&cache, "k"), use_reload(&cache, "j"));
        assert_ne!(use_reload(&cache, "k"), use_reload(&other, "k"));
    }

    #[test]
    fn test_reload_unknown_key_fails() {
        let cache = AsyncCache::client();
        let err = use_reload(&cache, "ghost").trigger().unwrap_err();
        assert!(matches!(err, SsrError::MissingFetcher(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_reported_as_error() {
        let cache = AsyncCache::server();
        let mut root = Root::new(Mode::Server);
        let c = cache.clone();
        root.push(move |scope| {
            let state = use_ssr::<Vec<String>>(scope, &c, fetcher(|| async { Ok::<_, FetchError>(3) }), Some("n"))?;
            Ok(format!("{}", state.error.is_some()))
        });
        assert_eq!(root.render().await.unwrap(), "true");
    }

    #[tokio::test]
    async fn test_second_emitter_renders_nothing() {
        let cache = AsyncCache::server();
        let mut root = Root::new(Mode::Server);
        for _ in 0..2 {
            let c = cache.clone();
            root.push(move |scope| data_render(scope, &c, DATA_ANCHOR));
        }
        root.render().await.unwrap();
        assert!(root.output(0).unwrap().starts_with("<script"));
        assert_eq!(root.output(1), Some(""));
    }

    #[tokio::test]
    async fn test_ssr_wait_blocks_until_drained() {
        let cache = AsyncCache::server();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut root = Root::new(Mode::Server);
        let (c, sink) = (cache.clone(), Arc::clone(&order));
        root.push(move |scope| {
            ssr_wait(scope, &c)?;
            lock(&sink).push("after");
            Ok(String::new())
        });
        let (c, sink) = (cache.clone(), Arc::clone(&order));
        root.push(move |scope| {
            use_ssr::<i64>(scope, &c, fetcher(|| async { Ok::<_, FetchError>(1) }), Some("x"))?;
            lock(&sink).push("data");
            Ok(String::new())
        });
        let c = cache.clone();
        root.push(move |scope| data_render(scope, &c, DATA_ANCHOR));
        root.render().await.unwrap();
        assert_eq!(*lock(&order), vec!["data", "after"]);
        assert!(cache.is_finished());
    }
}
