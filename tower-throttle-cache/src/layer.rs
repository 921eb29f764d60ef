use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use throttle_cache::Clock;
use throttle_cache::Gateway;
use throttle_cache::ThrottleWindow;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::service::GatewayService;
use crate::store::ServiceStore;
use crate::store::StoreRequest;
use crate::store::StoreResponse;

/// Puts a throttled, cached [`Gateway`] in front of a store service.
///
/// Each call to `layer` builds a separate gateway with its own quotas and
/// cache. Clone the resulting service to share one.
pub struct GatewayLayer<V> {
    window: ThrottleWindow,
    clock: Arc<dyn Clock>,
    _value: PhantomData<fn() -> V>,
}

impl<V> fmt::Debug for GatewayLayer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayLayer")
            .field("window", &self.window)
            .field("clock", &self.clock)
            .finish()
    }
}

// Deriving Clone would require `V: Clone`.
impl<V> Clone for GatewayLayer<V> {
    fn clone(&self) -> Self {
        Self {
            window: self.window.clone(),
            clock: Arc::clone(&self.clock),
            _value: PhantomData,
        }
    }
}

impl<V> GatewayLayer<V> {
    pub fn new(window: ThrottleWindow, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            _value: PhantomData,
        }
    }
}

impl<T, V> Layer<T> for GatewayLayer<V>
where
    T: Service<StoreRequest<V>, Response = StoreResponse<V>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
    V: Clone + Send + Sync + 'static,
{
    type Service = GatewayService<ServiceStore<T, V>>;

    fn layer(&self, inner: T) -> Self::Service {
        let gateway = Gateway::new(
            self.window.clone(),
            Arc::new(ServiceStore::new(inner)),
            Arc::clone(&self.clock),
        );
        GatewayService::new(Arc::new(gateway))
    }
}
