//! Per-tree context and provider

use ssrdata::hydration::hydrate;
use ssrdata::{AsyncCache, Component, Document, Mode, Root, data_render};
use tracing::{debug, info};

use crate::config::Config;
use crate::head::{HeadStore, head_marker, hydrate_head};

/// Cache and head store for one render tree
///
/// Build one per request on the server and one per page on the client.
#[derive(Clone)]
pub struct SsrContext {
    cache: AsyncCache,
    head: HeadStore,
    data_anchor: String,
    head_anchor: String,
    max_passes: usize,
}

impl SsrContext {
    fn new(mode: Mode, config: &Config) -> Self {
        Self {
            cache: AsyncCache::new(mode),
            head: HeadStore::new(),
            data_anchor: config.hydration.data_anchor.clone(),
            head_anchor: config.hydration.head_anchor.clone(),
            max_passes: config.render.max_passes,
        }
    }

    pub fn server(config: &Config) -> Self {
        debug!("SsrContext::server: called");
        Self::new(Mode::Server, config)
    }

    /// Client context seeded from both payloads in `document`
    pub fn client(config: &Config, document: &dyn Document) -> Self {
        let ctx = Self::new(Mode::Client, config);
        let seeded = hydrate(&ctx.cache, document, &ctx.data_anchor);
        let head = hydrate_head(&ctx.head, document, &ctx.head_anchor);
        info!(seeded, head, "SsrContext::client: hydrated");
        ctx
    }

    pub fn mode(&self) -> Mode {
        self.cache.mode()
    }

    pub fn cache(&self) -> &AsyncCache {
        &self.cache
    }

    pub fn head(&self) -> &HeadStore {
        &self.head
    }

    pub fn data_anchor(&self) -> &str {
        &self.data_anchor
    }

    pub fn head_anchor(&self) -> &str {
        &self.head_anchor
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }
}

/// Build the tree: `children`, then the head marker, then the data emitter
pub fn ssr_provider(ctx: &SsrContext, children: Vec<Component>) -> Root {
    let mut root = Root::new(ctx.mode()).with_max_passes(ctx.max_passes);
    for child in children {
        root.push_boxed(child);
    }

    let head = ctx.head.clone();
    root.push(move |scope| head_marker(scope, &head));

    let cache = ctx.cache.clone();
    let anchor = ctx.data_anchor.clone();
    root.push(move |scope| data_render(scope, &cache, &anchor));
    root
}
