use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use throttle_cache::Gateway;
use throttle_cache::ResourceStore;
use tower::BoxError;
use tower::Service;

use crate::error::GatewayRejection;

/// A request to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRequest<V> {
    Get {
        client: String,
        key: String,
    },
    AddOrUpdate {
        client: String,
        key: String,
        value: V,
    },
}

impl<V> GatewayRequest<V> {
    pub fn get(client: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Get {
            client: client.into(),
            key: key.into(),
        }
    }

    pub fn add_or_update(client: impl Into<String>, key: impl Into<String>, value: V) -> Self {
        Self::AddOrUpdate {
            client: client.into(),
            key: key.into(),
            value,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::AddOrUpdate { .. } => "add_or_update",
        }
    }
}

/// A successful gateway response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse<V> {
    /// The resource asked for by [`GatewayRequest::Get`].
    Resource(V),
    /// [`GatewayRequest::AddOrUpdate`] reached the store.
    Stored,
}

#[derive(Clone, Debug)]
struct GatewayServiceMetrics {
    requests: Counter<u64>,
}

/// Serves [`GatewayRequest`]s from a shared [`Gateway`].
///
/// The service is always ready: throttling happens per request inside `call`,
/// and rejections come back as a boxed [`GatewayRejection`]. Clones share the
/// same gateway, so they share quotas and the cache.
#[derive(Debug)]
pub struct GatewayService<S: ResourceStore> {
    gateway: Arc<Gateway<S>>,
    instruments: GatewayServiceMetrics,
}

impl<S: ResourceStore> Clone for GatewayService<S> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S: ResourceStore> Service<GatewayRequest<S::Value>> for GatewayService<S> {
    type Response = GatewayResponse<S::Value>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GatewayRequest<S::Value>) -> Self::Future {
        let gateway = Arc::clone(&self.gateway);
        let instruments = self.instruments.clone();

        Box::pin(async move {
            let operation = req.operation();
            let res = match req {
                GatewayRequest::Get { client, key } => gateway
                    .get(&client, &key)
                    .await
                    .map(GatewayResponse::Resource),
                GatewayRequest::AddOrUpdate { client, key, value } => gateway
                    .add_or_update(&client, &key, value)
                    .await
                    .map(|()| GatewayResponse::Stored),
            };

            let outcome = match &res {
                Ok(_) => "ok",
                Err(err) => err.kind().as_str(),
            };
            tracing::trace!(operation, outcome, "gateway request complete");
            instruments.requests.add(
                1,
                &[
                    KeyValue::new("operation", operation),
                    KeyValue::new("outcome", outcome),
                ],
            );

            res.map_err(|err| BoxError::from(GatewayRejection::from(err)))
        })
    }
}

impl<S: ResourceStore> GatewayService<S> {
    pub fn new(gateway: Arc<Gateway<S>>) -> Self {
        let meter = global::meter("throttle_cache_gateway");
        let instruments = GatewayServiceMetrics {
            requests: meter.u64_counter("gateway_requests").build(),
        };

        Self {
            gateway,
            instruments,
        }
    }

    /// The gateway behind this service, for reconfiguration.
    pub fn gateway(&self) -> &Arc<Gateway<S>> {
        &self.gateway
    }
}
