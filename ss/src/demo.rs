//! Three-key demo page
//!
//! `A` resolves to 1, `B` (read only once `A` is present) resolves to 2 and
//! `C` rejects with "boom". Because `B` is discovered only after `A` settles,
//! the server needs two convergence rounds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use eyre::{Context, Result};
use serde_json::Value;
use ssrdata::{Component, FetchError, HtmlDocument, RenderResult, RenderScope, fetcher, use_ssr};
use tracing::info;

use crate::config::Config;
use crate::head::{HeadFragment, head_root, ssr_head};
use crate::provider::{SsrContext, ssr_provider};

/// Keys read by the demo page, in render order
pub const DEMO_KEYS: [&str; 3] = ["A", "B", "C"];

/// One key as a context holds it after a pass
#[derive(Debug, Clone, PartialEq)]
pub struct KeyReport {
    pub key: String,
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub loading: bool,
}

#[derive(Debug, Clone)]
pub struct ServerRun {
    pub html: String,
    pub fetches: usize,
    pub rounds: usize,
}

#[derive(Debug, Clone)]
pub struct ClientRun {
    pub html: String,
    pub fetches: usize,
    pub keys: Vec<KeyReport>,
    pub head: Vec<HeadFragment>,
}

fn component(f: impl FnMut(&mut RenderScope<'_>) -> RenderResult<String> + Send + 'static) -> Component {
    Box::new(f)
}

fn counted<T>(fetches: &Arc<AtomicUsize>, result: Result<T, &'static str>) -> ssrdata::Fetcher
where
    T: serde::Serialize + Clone + Send + Sync + 'static,
{
    let fetches = Arc::clone(fetches);
    fetcher(move || {
        fetches.fetch_add(1, Ordering::SeqCst);
        let result = result.clone().map_err(FetchError::from);
        async move { result }
    })
}

/// Component slots of the demo page; every producer bumps `fetches`
pub fn demo_tree(ctx: &SsrContext, fetches: &Arc<AtomicUsize>) -> Vec<Component> {
    let mut children = Vec::new();

    let (cache, head, anchor) = (ctx.cache().clone(), ctx.head().clone(), ctx.head_anchor().to_string());
    children.push(component(move |scope| {
        let emission = head_root(scope, &cache, &head, &anchor)?;
        Ok(format!("<head>{}</head>", emission.to_html()))
    }));

    let (cache, head, counter) = (ctx.cache().clone(), ctx.head().clone(), Arc::clone(fetches));
    children.push(component(move |scope| {
        ssr_head(scope, &head, vec![HeadFragment::title("ssrsync demo")]);
        let a = use_ssr::<i64>(scope, &cache, counted(&counter, Ok(1i64)), Some("A"))?;
        let Some(a_value) = a.data else {
            return Ok(r#"<p id="a">loading</p>"#.to_string());
        };
        let b = use_ssr::<i64>(scope, &cache, counted(&counter, Ok(2i64)), Some("B"))?;
        let b_text = b.data.map(|v| v.to_string()).unwrap_or_else(|| "loading".to_string());
        Ok(format!(r#"<p id="a">{}</p><p id="b">{}</p>"#, a_value, b_text))
    }));

    let (cache, head, counter) = (ctx.cache().clone(), ctx.head().clone(), Arc::clone(fetches));
    children.push(component(move |scope| {
        ssr_head(scope, &head, vec![HeadFragment::meta("description", "three keys, one payload")]);
        let c = use_ssr::<i64>(scope, &cache, counted::<i64>(&counter, Err("boom")), Some("C"))?;
        Ok(match (c.data, c.error) {
            (_, Some(err)) => format!(r#"<p id="c" class="error">{}</p>"#, err),
            (Some(value), None) => format!(r#"<p id="c">{}</p>"#, value),
            (None, None) => r#"<p id="c">loading</p>"#.to_string(),
        })
    }));

    children
}

/// State of every demo key in `ctx`
pub fn report(ctx: &SsrContext) -> Vec<KeyReport> {
    DEMO_KEYS
        .iter()
        .map(|key| match ctx.cache().get(key) {
            Some(entry) => KeyReport {
                key: key.to_string(),
                data: entry.data.clone(),
                error: entry.error.clone(),
                loading: entry.loading,
            },
            None => KeyReport {
                key: key.to_string(),
                data: None,
                error: None,
                loading: false,
            },
        })
        .collect()
}

/// Render the demo page on the server
pub async fn run_server(config: &Config) -> Result<ServerRun> {
    let ctx = SsrContext::server(config);
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut root = ssr_provider(&ctx, demo_tree(&ctx, &fetches));
    let html = root.render().await.context("Server render failed")?;
    let rounds = ctx.cache().gate().rounds();
    info!(rounds, fetches = fetches.load(Ordering::SeqCst), "run_server: rendered");
    Ok(ServerRun {
        html,
        fetches: fetches.load(Ordering::SeqCst),
        rounds,
    })
}

/// Hydrate a client from `html` and render the demo page against it
pub async fn run_client(config: &Config, html: &str) -> Result<ClientRun> {
    let ctx = SsrContext::client(config, &HtmlDocument::new(html));
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut root = ssr_provider(&ctx, demo_tree(&ctx, &fetches));
    let mut html = root.render().await.context("Client render failed")?;
    if root.is_dirty() {
        html = root.rerender().await.context("Client update failed")?;
    }
    info!(fetches = fetches.load(Ordering::SeqCst), "run_client: hydrated");
    Ok(ClientRun {
        html,
        fetches: fetches.load(Ordering::SeqCst),
        keys: report(&ctx),
        head: ctx.head().flatten(),
    })
}
