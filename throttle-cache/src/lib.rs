//! # throttle-cache
//!
//! `throttle-cache` guards a slow resource store behind per-client throttling
//! and a read-through cache.
//!
//! ## Core Philosophy
//!
//! Each request is first counted against its client's quota, then served.
//! Reads go through a cache that runs at most one fetch per key at a time and
//! hands its result to everyone who asked for it meanwhile. Writes go straight
//! to the store and then drop the cached copy, so a confirmed write is never
//! followed by a stale read.
//!
//! ## Key Concepts
//!
//! * **Fixed Windows**: Quotas reset at boundaries aligned on a fixed root
//!   instant. Windows are rolled lazily by the first request to notice, with no
//!   background timer.
//! * **Lock-Free Throttling**: Client counters are atomics; a throttle
//!   decision never waits on a resource lock.
//! * **Single-Flight Reads**: Concurrent misses on one key share one fetch.
//!   Failures are handed to every waiter but never cached.
//! * **Per-Key Locks**: Reads of a key share its lock, writes take it alone,
//!   and unrelated keys never contend.
//! * **Injected Collaborators**: The [`Clock`] and the [`ResourceStore`] are
//!   passed in, which makes time fully controllable in tests.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use throttle_cache::{RateLimiter, SystemClock, ThrottleWindow};
//!
//! let window = ThrottleWindow::new(
//!     Duration::from_secs(60),
//!     std::time::UNIX_EPOCH,
//!     NonZeroUsize::new(100).unwrap(),
//!     Duration::from_secs(60),
//! )
//! .unwrap();
//! let limiter = RateLimiter::new(window, Arc::new(SystemClock));
//!
//! if limiter.process("10.0.0.1").is_continue() {
//!     // Request allowed
//! }
//! ```

mod cache;
mod clock;
mod error;
mod gateway;
mod locks;
mod rate_limiter;
mod store;
mod window;


pub use cache::ResourceCache;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use error::ConfigError;
pub use error::ErrorKind;
pub use error::FetchError;
pub use error::GatewayError;
pub use error::StoreError;
pub use gateway::Gateway;
pub use locks::KeyLocks;
pub use rate_limiter::RateLimiter;
pub use rate_limiter::Reason;
pub use store::ResourceStore;
pub use window::BanPolicy;
pub use window::ThrottleWindow;
