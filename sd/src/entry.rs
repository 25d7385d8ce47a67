//! Cache entry types
//!
//! An entry is the `{data | error, loading, fetcher}` record for one key. It is
//! never mutated in place: every transition builds a fresh [`CacheEntry`] and
//! swaps it into the cache, so a reader holding an `Arc<CacheEntry>` always
//! sees a consistent record.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one fetch
pub type Settled = Result<Value, FetchError>;

/// A no-argument async producer, stored per key for reloads
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Settled> + Send + Sync>;

/// An in-flight fetch; cloneable so the cache, the gate and any suspended
/// render can all wait on the same settlement
pub type Operation = Shared<BoxFuture<'static, Settled>>;

/// Reason a producer rejected
///
/// Carried as JSON so it can travel in the hydration payload unchanged
/// (a producer rejecting with `"boom"` hydrates as `"boom"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchError(Value);

impl FetchError {
    pub fn new(reason: impl Into<Value>) -> Self {
        Self(reason.into())
    }

    /// The raw rejection reason
    pub fn reason(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<&str> for FetchError {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for FetchError {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

impl From<Value> for FetchError {
    fn from(reason: Value) -> Self {
        Self(reason)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Adapt a typed async producer into a [`Fetcher`]
///
/// The produced value is converted to JSON on success; the rejection reason is
/// converted with `Into<FetchError>`.
pub fn fetcher<T, E, F, Fut>(producer: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Serialize + Send + 'static,
    E: Into<FetchError> + Send + 'static,
{
    Arc::new(move || {
        let pending = producer();
        async move {
            let value = pending.await.map_err(Into::into)?;
            serde_json::to_value(value).map_err(FetchError::from)
        }
        .boxed()
    })
}

/// State of one key
#[derive(Clone)]
pub struct CacheEntry {
    /// Last successful value, absent while loading or after a failure
    pub data: Option<Value>,
    /// Last rejection reason, absent while loading or after a success
    pub error: Option<FetchError>,
    /// A fetch has started and not yet settled
    pub loading: bool,
    pub(crate) fetcher: Option<Fetcher>,
    pub(crate) inflight: Option<Operation>,
    pub(crate) generation: u64,
}

impl CacheEntry {
    pub(crate) fn loading(fetcher: Fetcher, inflight: Operation, generation: u64) -> Self {
        Self {
            data: None,
            error: None,
            loading: true,
            fetcher: Some(fetcher),
            inflight: Some(inflight),
            generation,
        }
    }

    pub(crate) fn settled(result: Settled, fetcher: Option<Fetcher>, generation: u64) -> Self {
        let (data, error) = match result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            data,
            error,
            loading: false,
            fetcher,
            inflight: None,
            generation,
        }
    }

    /// A settled entry restored from a payload; it has no fetcher until a
    /// component supplies one
    pub fn hydrated(data: Option<Value>, error: Option<FetchError>) -> Self {
        Self {
            data,
            error,
            loading: false,
            fetcher: None,
            inflight: None,
            generation: 0,
        }
    }

    pub(crate) fn with_fetcher(&self, fetcher: Fetcher) -> Self {
        Self {
            fetcher: Some(fetcher),
            ..self.clone()
        }
    }

    /// Producer recorded for reloads
    pub fn fetcher(&self) -> Option<&Fetcher> {
        self.fetcher.as_ref()
    }

    /// Pending operation while loading
    pub fn inflight(&self) -> Option<&Operation> {
        self.inflight.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        !self.loading
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("data", &self.data)
            .field("error", &self.error)
            .field("loading", &self.loading)
            .field("has_fetcher", &self.fetcher.is_some())
            .field("inflight", &self.inflight.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(FetchError::from("boom").to_string(), "boom");
        assert_eq!(FetchError::new(json!({"code": 7})).to_string(), r#"{"code":7}"#);
    }

    #[test]
    fn test_fetch_error_serializes_as_bare_reason() {
        let err = FetchError::from("boom");
        assert_eq!(serde_json::to_string(&err).unwrap(), r#""boom""#);
    }

    #[test]
    fn test_settled_sets_exactly_one_side() {
        let ok = CacheEntry::settled(Ok(json!(1)), None, 1);
        assert_eq!(ok.data, Some(json!(1)));
        assert!(ok.error.is_none());
        assert!(!ok.loading);

        let err = CacheEntry::settled(Err("boom".into()), None, 2);
        assert!(err.data.is_none());
        assert_eq!(err.error, Some(FetchError::from("boom")));
        assert!(err.is_settled());
    }

    #[tokio::test]
    async fn test_fetcher_adapts_typed_producer() {
        let ok = fetcher(|| async { Ok::<_, FetchError>(vec![1, 2]) });
        assert_eq!(ok().await, Ok(json!([1, 2])));

        let failing = fetcher(|| async { Err::<u32, _>("nope") });
        assert_eq!(failing().await, Err(FetchError::from("nope")));
    }
}
