//! SsrSync - server render / client hydration synchronization
//!
//! Builds on [`ssrdata`] (the per-key async data cache) and adds the rest of
//! what a page needs to render twice with the same result:
//!
//! - [`head`] - head fragments declared anywhere in the tree, emitted once
//!   the data phase and every declaration are complete
//! - [`provider`] - one cache and one head store per render tree
//! - [`config`] - YAML configuration (payload anchors, pass limit, log level)
//! - [`inspect`] / [`demo`] - the `ss` command's operations

pub mod cli;
pub mod config;
pub mod demo;
pub mod head;
pub mod inspect;
pub mod provider;

pub use head::{HEAD_ANCHOR, HeadEmission, HeadFragment, HeadGroup, HeadStore, head_marker, head_root, hydrate_head, ssr_head};
pub use provider::{SsrContext, ssr_provider};
