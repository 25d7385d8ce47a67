//! Head aggregation across server render and client hydration
//!
//! Components declare head fragments with [`ssr_head`]; [`head_root`] emits
//! them once every declaring subtree has rendered, together with a payload
//! the client uses to start from the same head.

mod finalize;
mod fragment;
mod store;

pub use finalize::{HEAD_ANCHOR, HeadEmission, decode_head, head_marker, head_root, hydrate_head, ssr_head};
pub use fragment::{HeadFragment, HeadGroup};
pub use store::HeadStore;
