//! Hydration payload: server snapshot out, client seed in

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::AsyncCache;
use crate::entry::{CacheEntry, FetchError};
use crate::error::SsrResult;
use crate::render::Mode;

/// Default element id of the embedded data payload
pub const DATA_ANCHOR: &str = "__NEXT_DATA_PROMISE__";

/// One key of the data payload
///
/// An absent `data` or `error` means the field was unset when the server
/// emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchError>,
    #[serde(rename = "isLoading")]
    pub is_loading: bool,
}

impl From<&CacheEntry> for PayloadEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            data: entry.data.clone(),
            error: entry.error.clone(),
            is_loading: entry.loading,
        }
    }
}

/// Key to entry, ordered by key so the emitted text is deterministic
pub type DataPayload = BTreeMap<String, PayloadEntry>;

/// Snapshot every settled entry of `cache`
pub fn encode_entries(cache: &AsyncCache) -> DataPayload {
    cache
        .entries()
        .into_iter()
        .filter(|(_, entry)| entry.is_settled())
        .map(|(key, entry)| (key, PayloadEntry::from(entry.as_ref())))
        .collect()
}

/// Serialize the snapshot of `cache` as JSON text (unescaped)
pub fn encode(cache: &AsyncCache) -> SsrResult<String> {
    let payload = encode_entries(cache);
    debug!(keys = payload.len(), "encode: called");
    Ok(serde_json::to_string(&payload)?)
}

/// Make JSON text safe to embed inside a script element
///
/// `<` only occurs inside JSON strings, where `<` decodes to the same
/// character, so the escaped text parses to the same value.
pub fn escape_payload(text: &str) -> String {
    text.replace('<', "\\u003c")
}

/// Wrap an escaped payload in its anchor element
pub fn script_tag(anchor: &str, body: &str) -> String {
    format!(r#"<script id="{}" type="application/json">{}</script>"#, anchor, body)
}

/// Parse payload text
///
/// Anything that does not match the schema is treated as no payload at all.
/// Entries still marked loading are dropped so the client fetches them.
pub fn decode(text: &str) -> Option<DataPayload> {
    match serde_json::from_str::<DataPayload>(text) {
        Ok(payload) => Some(payload.into_iter().filter(|(_, entry)| !entry.is_loading).collect()),
        Err(err) => {
            warn!(error = %err, "decode: malformed data payload ignored");
            None
        }
    }
}

/// Source of embedded payload text on the client
pub trait Document {
    /// Raw text of the element identified by `anchor`, if present
    fn payload(&self, anchor: &str) -> Option<String>;
}

/// A rendered HTML document
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    html: String,
}

impl HtmlDocument {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

impl Document for HtmlDocument {
    fn payload(&self, anchor: &str) -> Option<String> {
        let pattern = format!(
            r#"(?s)<script id="{}" type="application/json">(.*?)</script>"#,
            regex::escape(anchor)
        );
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(err) => {
                warn!(%anchor, error = %err, "payload: invalid anchor pattern");
                return None;
            }
        };
        re.captures(&self.html)
            .and_then(|caps| caps.get(1))
            .map(|body| body.as_str().to_string())
    }
}

/// Seed `cache` from the payload in `document`, once per cache
///
/// Returns the number of entries installed; every call after the first
/// returns 0 without touching the cache. A client cache is marked finished
/// afterwards since it never runs a data phase of its own.
pub fn hydrate(cache: &AsyncCache, document: &dyn Document, anchor: &str) -> usize {
    if !cache.mark_hydrated() {
        debug!(%anchor, "hydrate: already hydrated");
        return 0;
    }

    let seeded = match document.payload(anchor).and_then(|text| decode(&text)) {
        Some(payload) => cache.seed(
            payload
                .into_iter()
                .map(|(key, entry)| (key, CacheEntry::hydrated(entry.data, entry.error))),
        ),
        None => {
            info!(%anchor, "hydrate: no data payload, components will fetch");
            0
        }
    };

    if cache.mode() == Mode::Client {
        cache.gate().finish();
    }
    info!(seeded, "hydrate: cache seeded");
    seeded
}
