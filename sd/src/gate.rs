//! ConvergenceGate - drains in-flight fetches to a fixed point (server only)
//!
//! Every server-side fetch is registered here. Settlement does not remove an
//! operation; only [`ConvergenceGate::drain`] does, so the gate alone decides
//! when the data phase is over. Settling one batch of fetches can mount new
//! components that start more fetches, so draining is repeated until a call
//! finds nothing outstanding. Completion is tracked per operation identity,
//! not by comparing set sizes, so a batch that replaces settled operations
//! with the same number of new ones is still waited on.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::entry::Operation;
use crate::lock;
use crate::render::{Interrupt, RenderResult, Suspension};

/// One-shot latched signal
///
/// Released at most once; waiters that arrive after the release complete
/// immediately.
#[derive(Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Release the signal; returns true only for the call that released it
    pub fn release(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspension that completes once the signal is released
    pub fn wait(&self) -> Suspension {
        let mut rx = self.tx.subscribe();
        Suspension::new(async move {
            let _ = rx.wait_for(|released| *released).await;
        })
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks outstanding server fetches and the "data phase finished" signal
pub struct ConvergenceGate {
    pending: Mutex<Vec<(u64, Operation)>>,
    next_id: AtomicU64,
    rounds: AtomicUsize,
    finished: Signal,
}

impl ConvergenceGate {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            rounds: AtomicUsize::new(0),
            finished: Signal::new(),
        }
    }

    /// Track an operation until a drain observes it settled
    pub fn register(&self, op: Operation) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut pending = lock(&self.pending);
        pending.push((id, op));
        debug!(id, outstanding = pending.len(), "register: called");
        id
    }

    /// Number of operations not yet removed by a drain
    pub fn outstanding(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Number of times a drain has had to suspend
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_released()
    }

    /// Suspension completing when the data phase has finished
    pub fn wait(&self) -> Suspension {
        self.finished.wait()
    }

    /// Mark the data phase finished without draining
    ///
    /// Used on the client, where hydration stands in for the data phase.
    pub fn finish(&self) -> bool {
        self.finished.release()
    }

    /// One step of the drain protocol
    ///
    /// Drops every operation that has settled. If none remain, the finished
    /// signal is released and the caller may emit. Otherwise the caller must
    /// suspend until everything currently outstanding has settled, then call
    /// again; operations registered meanwhile are picked up by that call.
    pub fn drain(&self) -> RenderResult<()> {
        let mut pending = lock(&self.pending);
        let before = pending.len();
        pending.retain(|(_, op)| op.peek().is_none());
        let settled = before - pending.len();

        if pending.is_empty() {
            drop(pending);
            if self.finished.release() {
                info!(rounds = self.rounds(), "drain: data phase finished");
            }
            return Ok(());
        }

        let ops: Vec<Operation> = pending.iter().map(|(_, op)| op.clone()).collect();
        drop(pending);
        let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(round, settled, outstanding = ops.len(), "drain: suspending on outstanding operations");
        Err(Interrupt::Suspended(Suspension::new(join_all(ops).map(|_| ()))))
    }
}

impl Default for ConvergenceGate {
    fn default() -> Self {
        Self::new()
    }
}
