//! Host renderer contract and reference host
//!
//! The data layer needs exactly three things from whatever renders the
//! component tree:
//!
//! 1. Abort-and-retry: a render step returns [`Interrupt::Suspended`] with a
//!    [`Suspension`] to await, and the host renders that step again once it
//!    settles.
//! 2. The [`Mode`] of the pass (server or client).
//! 3. A post-commit hook ([`RenderScope::after_commit`]) run after a client pass.
//!
//! [`Root`] is a minimal host that honours the contract. A tree is an ordered
//! list of slots; each slot is one suspense boundary. Slots that suspend are
//! rendered again, in slot order, whenever any outstanding suspension
//! settles. Output is the concatenation of slot outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info};

use crate::entry::Operation;
use crate::error::{SsrError, SsrResult};
use crate::lock;

/// Default number of render rounds before a pass is abandoned
pub const DEFAULT_MAX_PASSES: usize = 100;

/// Which side of the handshake a pass runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

/// A pending operation handed to the host to wait on
#[derive(Clone)]
pub struct Suspension {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl Suspension {
    pub fn new(pending: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            inner: pending.boxed().shared(),
        }
    }

    /// Suspend until `op` settles, whatever its outcome
    pub fn on(op: &Operation) -> Self {
        Self::new(op.clone().map(|_| ()))
    }
}

impl Future for Suspension {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("settled", &self.inner.peek().is_some())
            .finish()
    }
}

/// Why a render step did not produce output
#[derive(Debug)]
pub enum Interrupt {
    /// Not ready; retry after the suspension settles
    Suspended(Suspension),
    /// Usage or host fault; the pass is abandoned
    Fault(SsrError),
}

impl Interrupt {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }
}

impl From<SsrError> for Interrupt {
    fn from(err: SsrError) -> Self {
        Self::Fault(err)
    }
}

impl From<serde_json::Error> for Interrupt {
    fn from(err: serde_json::Error) -> Self {
        Self::Fault(SsrError::from(err))
    }
}

/// Result of a render step
pub type RenderResult<T> = Result<T, Interrupt>;

/// Cleanup run when a mounted instance goes away
pub type Teardown = Box<dyn FnOnce() + Send>;

/// One slot of the tree
pub type Component = Box<dyn FnMut(&mut RenderScope<'_>) -> RenderResult<String> + Send>;

type Effect = Box<dyn FnOnce() + Send>;
type InstanceId = (usize, usize);

#[derive(Default)]
struct HostState {
    dirty: Mutex<BTreeSet<usize>>,
    mounts: Mutex<BTreeMap<InstanceId, Option<Teardown>>>,
}

/// Per-slot view of the host handed to a component while it renders
///
/// Hooks are identified by call order within the slot, so a component must
/// call them in the same order on every render.
pub struct RenderScope<'a> {
    mode: Mode,
    slot: usize,
    hook: usize,
    host: &'a Arc<HostState>,
    effects: &'a mut Vec<Effect>,
}

impl RenderScope<'_> {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_server(&self) -> bool {
        self.mode == Mode::Server
    }

    /// Index of the slot being rendered
    pub fn slot(&self) -> usize {
        self.slot
    }

    fn next_instance(&mut self) -> InstanceId {
        let id = (self.slot, self.hook);
        self.hook += 1;
        id
    }

    /// Stable per-call-site identifier
    ///
    /// Identical between a server pass and a client pass over the same tree
    /// shape, which is what lets auto-keyed entries hydrate.
    pub fn use_id(&mut self) -> String {
        let (slot, hook) = self.next_instance();
        format!(":r{}-{}:", slot, hook)
    }

    /// Queue work to run after the pass commits (client only)
    pub fn after_commit(&mut self, effect: impl FnOnce() + Send + 'static) {
        self.effects.push(Box::new(effect));
    }

    /// Run `init` the first time this call site renders, right away
    ///
    /// Its teardown runs when the slot unmounts. Returns true if `init` ran.
    pub fn use_mount(&mut self, init: impl FnOnce() -> Option<Teardown>) -> bool {
        let id = self.next_instance();
        {
            let mut mounts = lock(&self.host.mounts);
            if mounts.contains_key(&id) {
                return false;
            }
            mounts.insert(id, None);
        }
        let teardown = init();
        if let Some(slot) = lock(&self.host.mounts).get_mut(&id) {
            *slot = teardown;
        }
        true
    }

    /// Like [`use_mount`](Self::use_mount) but deferred until after commit
    ///
    /// A render that suspends never commits, so its effect is dropped and
    /// queued again by the retry.
    pub fn use_effect_once(&mut self, init: impl FnOnce() -> Option<Teardown> + Send + 'static) -> bool {
        let id = self.next_instance();
        if lock(&self.host.mounts).contains_key(&id) {
            return false;
        }
        let host = Arc::clone(self.host);
        self.after_commit(move || {
            if lock(&host.mounts).contains_key(&id) {
                return;
            }
            lock(&host.mounts).insert(id, None);
            let teardown = init();
            if let Some(slot) = lock(&host.mounts).get_mut(&id) {
                *slot = teardown;
            }
        });
        true
    }

    /// Subscribe this slot to an external store once
    ///
    /// `subscribe` receives a callback that marks the slot dirty and returns
    /// the teardown that unsubscribes it.
    pub fn use_subscription(&mut self, subscribe: impl FnOnce(Arc<dyn Fn() + Send + Sync>) -> Teardown) {
        let slot = self.slot;
        let host = Arc::clone(self.host);
        self.use_mount(move || {
            let invalidate: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                lock(&host.dirty).insert(slot);
            });
            Some(subscribe(invalidate))
        });
    }
}

struct Slot {
    component: Option<Component>,
    output: String,
}

/// Reference host: an ordered list of suspense boundaries
pub struct Root {
    mode: Mode,
    slots: Vec<Slot>,
    host: Arc<HostState>,
    max_passes: usize,
}

impl Root {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            slots: Vec::new(),
            host: Arc::new(HostState::default()),
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    /// Bound the number of render rounds per pass
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Append a slot; returns its index
    pub fn push(&mut self, component: impl FnMut(&mut RenderScope<'_>) -> RenderResult<String> + Send + 'static) -> usize {
        self.push_boxed(Box::new(component))
    }

    pub fn push_boxed(&mut self, component: Component) -> usize {
        self.slots.push(Slot {
            component: Some(component),
            output: String::new(),
        });
        self.slots.len() - 1
    }

    /// Render every slot until none is suspended
    pub async fn render(&mut self) -> SsrResult<String> {
        debug!(mode = ?self.mode, slots = self.slots.len(), "render: called");
        let targets: Vec<usize> = (0..self.slots.len()).collect();
        self.render_slots(targets).await?;
        Ok(self.document())
    }

    /// Render again only the slots whose subscriptions fired
    pub async fn rerender(&mut self) -> SsrResult<String> {
        let targets: Vec<usize> = std::mem::take(&mut *lock(&self.host.dirty)).into_iter().collect();
        debug!(?targets, "rerender: called");
        self.render_slots(targets).await?;
        Ok(self.document())
    }

    /// True if some subscription fired since the last render
    pub fn is_dirty(&self) -> bool {
        !lock(&self.host.dirty).is_empty()
    }

    /// Concatenated output of all mounted slots
    pub fn document(&self) -> String {
        self.slots
            .iter()
            .filter(|slot| slot.component.is_some())
            .map(|slot| slot.output.as_str())
            .collect()
    }

    /// Output of one slot from the last render
    pub fn output(&self, index: usize) -> Option<&str> {
        self.slots.get(index).map(|slot| slot.output.as_str())
    }

    /// Drop a slot and run the teardowns of everything it mounted
    pub fn unmount_slot(&mut self, index: usize) {
        debug!(index, "unmount_slot: called");
        if let Some(slot) = self.slots.get_mut(index) {
            slot.component = None;
            slot.output.clear();
        }
        lock(&self.host.dirty).remove(&index);
        let teardowns: Vec<Teardown> = {
            let mut mounts = lock(&self.host.mounts);
            let ids: Vec<InstanceId> = mounts.keys().filter(|(slot, _)| *slot == index).copied().collect();
            ids.into_iter().filter_map(|id| mounts.remove(&id).flatten()).collect()
        };
        for teardown in teardowns {
            teardown();
        }
    }

    /// Unmount every slot
    pub fn unmount(&mut self) {
        for index in 0..self.slots.len() {
            self.unmount_slot(index);
        }
    }

    async fn render_slots(&mut self, targets: Vec<usize>) -> SsrResult<()> {
        let mut effects = Vec::new();
        let mut pending = self.render_round(&targets, &mut effects)?;
        let mut passes = 1;
        while !pending.is_empty() {
            if passes >= self.max_passes {
                return Err(SsrError::PassLimit(passes));
            }
            debug!(passes, suspended = pending.len(), "render_slots: waiting on suspensions");
            let waits: Vec<Suspension> = pending.iter().map(|(_, suspension)| suspension.clone()).collect();
            futures::future::select_all(waits).await;
            let retry: Vec<usize> = pending.iter().map(|(index, _)| *index).collect();
            pending = self.render_round(&retry, &mut effects)?;
            passes += 1;
        }
        info!(mode = ?self.mode, passes, "Render pass complete");
        if self.mode == Mode::Client {
            for effect in effects {
                effect();
            }
        }
        Ok(())
    }

    fn render_round(&mut self, targets: &[usize], effects: &mut Vec<Effect>) -> SsrResult<Vec<(usize, Suspension)>> {
        let mut pending = Vec::new();
        for &index in targets {
            let Some(slot) = self.slots.get_mut(index) else {
                continue;
            };
            let Some(component) = slot.component.as_mut() else {
                continue;
            };
            let mut slot_effects = Vec::new();
            let mut scope = RenderScope {
                mode: self.mode,
                slot: index,
                hook: 0,
                host: &self.host,
                effects: &mut slot_effects,
            };
            match component(&mut scope) {
                Ok(output) => {
                    slot.output = output;
                    effects.extend(slot_effects);
                }
                Err(Interrupt::Suspended(suspension)) => pending.push((index, suspension)),
                Err(Interrupt::Fault(err)) => return Err(err),
            }
        }
        Ok(pending)
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        self.unmount();
    }
}
