//! Head declaration, completion marker and finalizer components

use ssrdata::hydration::{escape_payload, script_tag};
use ssrdata::{AsyncCache, Document, Interrupt, RenderResult, RenderScope, Teardown, ssr_wait};
use tracing::{debug, info, warn};

use super::fragment::{HeadFragment, HeadGroup};
use super::store::HeadStore;

/// Default element id of the embedded head payload
pub const HEAD_ANCHOR: &str = "__REMIX_HEAD_VALUE__";

/// Declare head fragments for the lifetime of the calling instance
///
/// The group is added once per instance (during render on the server, after
/// commit on the client) and that exact group is removed on unmount.
pub fn ssr_head(scope: &mut RenderScope<'_>, store: &HeadStore, fragments: Vec<HeadFragment>) {
    let store = store.clone();
    let mount = move || {
        let group = store.push(HeadGroup::new(fragments));
        Some(Box::new(move || {
            store.remove(&group);
        }) as Teardown)
    };
    if scope.is_server() {
        scope.use_mount(mount);
    } else {
        scope.use_effect_once(mount);
    }
}

/// Rendered after every declaring subtree; releases the head finalizer
pub fn head_marker(scope: &RenderScope<'_>, store: &HeadStore) -> RenderResult<String> {
    if store.mark_finished() {
        debug!(mode = ?scope.mode(), groups = store.len(), "head_marker: head declarations complete");
    }
    Ok(String::new())
}

/// Output of the head finalizer
#[derive(Debug, Clone, PartialEq)]
pub struct HeadEmission {
    /// Escaped JSON array of every fragment, in final order
    pub payload: String,
    pub fragments: Vec<HeadFragment>,
    anchor: String,
}

impl HeadEmission {
    /// Concrete tags followed by the payload script
    pub fn to_html(&self) -> String {
        let mut html: String = self.fragments.iter().map(HeadFragment::to_html).collect();
        html.push_str(&script_tag(&self.anchor, &self.payload));
        html
    }
}

/// Collect the head of the page
///
/// On the server this runs only after the data phase and every head
/// declaration are complete. On the client the store is reset once after
/// commit so that only declarations of the live tree accumulate, and the slot
/// re-renders whenever the store changes.
pub fn head_root(
    scope: &mut RenderScope<'_>,
    cache: &AsyncCache,
    store: &HeadStore,
    anchor: &str,
) -> RenderResult<HeadEmission> {
    if scope.is_server() {
        // Keep hook positions identical to the client pass
        scope.use_mount(|| None);
        scope.use_mount(|| None);
        ssr_wait(scope, cache)?;
        if !store.is_finished() {
            debug!("head_root: waiting for head declarations");
            return Err(Interrupt::Suspended(store.wait()));
        }
    } else {
        let live = store.clone();
        scope.use_effect_once(move || {
            live.reset();
            None
        });
        let watched = store.clone();
        scope.use_subscription(move |invalidate| {
            let sub = watched.subscribe(move || invalidate());
            Box::new(move || {
                watched.unsubscribe(sub);
            }) as Teardown
        });
    }

    let fragments = store.flatten();
    let payload = escape_payload(&serde_json::to_string(&fragments)?);
    Ok(HeadEmission {
        payload,
        fragments,
        anchor: anchor.to_string(),
    })
}

/// Parse head payload text; malformed text counts as no payload
pub fn decode_head(text: &str) -> Option<Vec<HeadFragment>> {
    match serde_json::from_str(text) {
        Ok(fragments) => Some(fragments),
        Err(err) => {
            warn!(error = %err, "decode_head: malformed head payload ignored");
            None
        }
    }
}

/// Seed `store` from the head payload embedded in `document`
///
/// Returns false, leaving the store untouched, when there is no usable
/// payload.
pub fn hydrate_head(store: &HeadStore, document: &dyn Document, anchor: &str) -> bool {
    let Some(fragments) = document.payload(anchor).and_then(|text| decode_head(&text)) else {
        info!(%anchor, "hydrate_head: no head payload");
        return false;
    };
    info!(fragments = fragments.len(), "hydrate_head: head seeded");
    store.push(HeadGroup::new(fragments));
    store.mark_finished();
    true
}
