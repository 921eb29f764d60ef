use std::fmt;
use std::marker::PhantomData;

use throttle_cache::ResourceStore;
use throttle_cache::StoreError;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use crate::error::UnexpectedStoreResponse;

/// A request to a resource store service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRequest<V> {
    Fetch { key: String },
    Upsert { key: String, value: V },
}

/// What a resource store service answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResponse<V> {
    /// The answer to [`StoreRequest::Fetch`].
    Value(V),
    /// The answer to [`StoreRequest::Upsert`].
    Stored,
}

/// Uses a `tower` service as the [`ResourceStore`] behind a gateway.
///
/// Every operation runs on a fresh clone of the service, so the service must
/// be cheap to clone.
pub struct ServiceStore<T, V> {
    inner: T,
    _value: PhantomData<fn() -> V>,
}

impl<T: fmt::Debug, V> fmt::Debug for ServiceStore<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceStore")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T: Clone, V> Clone for ServiceStore<T, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _value: PhantomData,
        }
    }
}

impl<T, V> ServiceStore<T, V> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            _value: PhantomData,
        }
    }
}

impl<T, V> ResourceStore for ServiceStore<T, V>
where
    T: Service<StoreRequest<V>, Response = StoreResponse<V>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    async fn fetch(&self, key: &str) -> Result<V, StoreError> {
        let req = StoreRequest::Fetch {
            key: key.to_owned(),
        };
        match self.inner.clone().oneshot(req).await? {
            StoreResponse::Value(value) => Ok(value),
            StoreResponse::Stored => Err(UnexpectedStoreResponse { operation: "fetch" }.into()),
        }
    }

    async fn upsert(&self, key: &str, value: V) -> Result<(), StoreError> {
        let req = StoreRequest::Upsert {
            key: key.to_owned(),
            value,
        };
        match self.inner.clone().oneshot(req).await? {
            StoreResponse::Stored => Ok(()),
            StoreResponse::Value(_) => Err(UnexpectedStoreResponse { operation: "upsert" }.into()),
        }
    }
}
