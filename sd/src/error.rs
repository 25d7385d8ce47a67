//! Errors raised synchronously by the data layer
//!
//! A producer that rejects is not an error here: its reason is recorded in the
//! entry as a [`crate::FetchError`] and surfaced through the hook. These
//! variants are usage or host faults that terminate the render pass.

use thiserror::Error;

/// Errors from cache, gate and host operations
#[derive(Debug, Error)]
pub enum SsrError {
    #[error("Empty by fetcher: no fetcher registered for key {0}")]
    MissingFetcher(String),

    #[error("Render did not settle within {0} passes")]
    PassLimit(usize),

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a synchronous data-layer operation
pub type SsrResult<T> = Result<T, SsrError>;
