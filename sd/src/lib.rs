//! SsrData - per-key async data cache for server render and client hydration
//!
//! A render tree that runs twice (once on the server to produce a complete
//! document, once on the client to pick it up) needs the client pass to reuse
//! what the server fetched. This crate provides the data side of that
//! handshake:
//!
//! - [`registry`] - per-key observer store used for change notification
//! - [`cache`] - the async cache: fetch trigger, reload, suspend-on-pending
//! - [`gate`] - server-side convergence of in-flight fetches to a fixed point
//! - [`hydration`] - payload encode/escape on the server, decode/seed on the client
//! - [`render`] - the host contract (suspension, mode, post-commit) and a
//!   minimal reference host used to drive component slots
//! - [`hooks`] - component-facing entry points built on the above
//!
//! # Flow
//!
//! ```text
//!   use_ssr(key) ──► AsyncCache::ensure ──► start ──► Operation (spawned)
//!        │                                      │
//!        │ server: Interrupt::Suspended         └──► ConvergenceGate::register
//!        ▼
//!   host retries slot ... data_render ──► gate.drain() ──► finished signal
//!                                             │
//!                                             ▼
//!                         <script id="__NEXT_DATA_PROMISE__">{...}</script>
//!
//!   client: hydrate(cache, document) ──► seeded entries ──► no refetch
//! ```

pub mod cache;
pub mod entry;
pub mod error;
pub mod gate;
pub mod hooks;
pub mod hydration;
pub mod registry;
pub mod render;

pub use cache::AsyncCache;
pub use entry::{CacheEntry, FetchError, Fetcher, Operation, Settled, fetcher};
pub use error::{SsrError, SsrResult};
pub use gate::{ConvergenceGate, Signal};
pub use hooks::{Reload, SsrState, data_render, ssr_wait, use_reload, use_ssr};
pub use hydration::{DATA_ANCHOR, DataPayload, Document, HtmlDocument, PayloadEntry};
pub use registry::{SubscriberRegistry, SubscriptionId};
pub use render::{Component, DEFAULT_MAX_PASSES, Interrupt, Mode, RenderResult, RenderScope, Root, Suspension, Teardown};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it
///
/// Critical sections guarded this way must be single map/vec swaps, so the
/// protected value is never left half-written. Shared with crates built on
/// this one.
pub fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_lock_recovers_poisoned_mutex() {
        let shared = Arc::new(Mutex::new(vec![1]));
        let clone = Arc::clone(&shared);
        let result = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(result.is_err());
        assert!(shared.is_poisoned());

        lock(&shared).push(2);
        assert_eq!(*lock(&shared), vec![1, 2]);
    }
}
