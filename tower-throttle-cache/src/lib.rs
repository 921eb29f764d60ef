//! # Tower Throttle Cache
//!
//! `tower-throttle-cache` serves a [`throttle_cache::Gateway`] as a
//! [Tower](https://github.com/tower-rs/tower) service, so the throttled,
//! cached front can be composed with the rest of a Tower stack.
//!
//! ## The Pieces
//!
//! 1. [`GatewayService`]: answers [`GatewayRequest`]s. It never applies
//!    backpressure; a throttled client gets an immediate
//!    [`GatewayRejection::Banned`] instead.
//! 2. [`ServiceStore`]: lets any cloneable `Service<StoreRequest<V>>` act as
//!    the resource store behind the gateway.
//! 3. [`GatewayLayer`]: builds both of the above around an inner store service.
//!
//! Every request is counted on the `gateway_requests` OpenTelemetry counter of
//! the `throttle_cache_gateway` meter, labelled with `operation` and `outcome`.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GatewayRejection`], allowing automatic
//!   conversion to HTTP status codes (400, 429, 502).

mod error;
mod layer;
mod service;
mod store;


pub use error::GatewayRejection;
pub use error::UnexpectedStoreResponse;
pub use layer::GatewayLayer;
pub use service::GatewayRequest;
pub use service::GatewayResponse;
pub use service::GatewayService;
pub use store::ServiceStore;
pub use store::StoreRequest;
pub use store::StoreResponse;
