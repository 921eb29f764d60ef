use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::cache::ResourceCache;
use crate::clock::Clock;
use crate::error::GatewayError;
use crate::locks::KeyLocks;
use crate::rate_limiter::RateLimiter;
use crate::rate_limiter::Reason;
use crate::store::ResourceStore;
use crate::window::ThrottleWindow;

/// Everything tied to one resource store.
struct Resources<S: ResourceStore> {
    store: Arc<S>,
    cache: ResourceCache<S::Value>,
    locks: KeyLocks,
}

impl<S: ResourceStore> Resources<S> {
    fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: ResourceCache::new(),
            locks: KeyLocks::new(),
        }
    }
}

/// One configuration of the gateway. Requests pin the generation they start
/// on, so reconfiguring never pulls state out from under them.
struct Generation<S: ResourceStore> {
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    resources: Arc<Resources<S>>,
}

impl<S: ResourceStore> Generation<S> {
    fn admit(&self, client: &str) -> Result<(), GatewayError> {
        match self.limiter.process(client) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(Reason::Banned { retry_after }) => {
                Err(GatewayError::Banned { retry_after })
            }
        }
    }
}

/// Throttles clients and serves reads from a single-flight cache in front of
/// a [`ResourceStore`].
///
/// Every request is validated, counted against its client's quota and only
/// then touches the cache or the store. Reads of a key share that key's lock
/// and writes hold it alone, so a read that fills the cache can never race a
/// write to the same key. Keys never contend with each other, and throttling
/// never waits on a key lock.
///
/// ```rust
/// use std::num::NonZeroUsize;
/// use std::sync::Arc;
/// use std::time::{Duration, SystemTime};
/// use throttle_cache::{ErrorKind, Gateway, ManualClock, ResourceStore, StoreError, ThrottleWindow};
///
/// struct Answer;
///
/// impl ResourceStore for Answer {
///     type Value = u32;
///
///     async fn fetch(&self, _key: &str) -> Result<u32, StoreError> {
///         Ok(42)
///     }
///
///     async fn upsert(&self, _key: &str, _value: u32) -> Result<(), StoreError> {
///         Ok(())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let window = ThrottleWindow::new(
///     Duration::from_secs(60),
///     SystemTime::UNIX_EPOCH,
///     NonZeroUsize::new(1).unwrap(),
///     Duration::from_secs(60),
/// )
/// .unwrap();
/// let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
/// let gateway = Gateway::new(window, Arc::new(Answer), clock);
///
/// assert_eq!(gateway.get("10.0.0.1", "answer").await.unwrap(), 42);
/// let err = gateway.get("10.0.0.1", "answer").await.unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::Banned);
/// # }
/// ```
pub struct Gateway<S: ResourceStore> {
    current: RwLock<Arc<Generation<S>>>,
}

impl<S: ResourceStore> fmt::Debug for Gateway<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current();
        f.debug_struct("Gateway")
            .field("clock", &current.clock)
            .field("limiter", &current.limiter)
            .field("cache", &current.resources.cache)
            .field("locks", &current.resources.locks.len())
            .finish()
    }
}

impl<S: ResourceStore> Gateway<S> {
    pub fn new(window: ThrottleWindow, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Self::generation(window, store, clock))),
        }
    }

    /// Replaces the settings, the store and the clock, starting from empty
    /// throttle state and an empty cache.
    ///
    /// Requests already running finish against the previous configuration.
    pub fn configure(&self, window: ThrottleWindow, store: Arc<S>, clock: Arc<dyn Clock>) {
        tracing::info!(?window, "gateway reconfigured");
        self.replace(Self::generation(window, store, clock));
    }

    /// Replaces the throttle settings. Counters and bans start over, cached
    /// resources are kept.
    pub fn set_throttle_window(&self, window: ThrottleWindow) {
        let current = self.current();
        tracing::info!(?window, "throttle window replaced");
        self.replace(Generation {
            limiter: Arc::new(RateLimiter::new(window, current.clock.clone())),
            clock: current.clock.clone(),
            resources: current.resources.clone(),
        });
    }

    /// Points the gateway at a different store. The cache starts empty,
    /// throttle state is kept.
    pub fn set_store(&self, store: Arc<S>) {
        let current = self.current();
        tracing::info!("resource store replaced");
        self.replace(Generation {
            clock: current.clock.clone(),
            limiter: current.limiter.clone(),
            resources: Arc::new(Resources::new(store)),
        });
    }

    /// Reads `key` on behalf of `client`, from the cache when possible.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidArgument`] if `client` or `key` is empty.
    /// - [`GatewayError::Banned`] if `client` is over its quota.
    /// - [`GatewayError::ExceptionDuringFetch`] if the store failed. The
    ///   failure is not cached.
    pub async fn get(&self, client: &str, key: &str) -> Result<S::Value, GatewayError> {
        validate(client, key)?;
        let current = self.current();
        current.admit(client)?;

        let resources = &current.resources;
        let _guard = resources.locks.read(key).await;

        let store = Arc::clone(&resources.store);
        let owned_key = key.to_owned();
        resources
            .cache
            .get_or_fetch(key, move || async move { store.fetch(&owned_key).await })
            .await
            .map_err(|err| {
                tracing::warn!(key, error = %err, "resource fetch failed");
                GatewayError::from(err)
            })
    }

    /// Writes `value` under `key` on behalf of `client`, then drops the
    /// cached copy so the next read goes back to the store.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidArgument`] if `client` or `key` is empty.
    /// - [`GatewayError::Banned`] if `client` is over its quota.
    /// - [`GatewayError::UpsertFailed`] if the store rejected the write. The
    ///   cache is not touched.
    pub async fn add_or_update(
        &self,
        client: &str,
        key: &str,
        value: S::Value,
    ) -> Result<(), GatewayError> {
        validate(client, key)?;
        let current = self.current();
        current.admit(client)?;

        let resources = &current.resources;
        let _guard = resources.locks.write(key).await;

        if let Err(err) = resources.store.upsert(key, value).await {
            tracing::warn!(key, error = %err, "resource upsert failed");
            return Err(GatewayError::UpsertFailed(err));
        }
        resources.cache.invalidate(key);
        Ok(())
    }

    /// Forgets per-key locks that nobody is using. Returns how many went.
    pub fn prune_idle_locks(&self) -> usize {
        self.current().resources.locks.prune_idle()
    }

    /// The limiter of the current configuration.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.current().limiter.clone()
    }

    /// Number of cached or in-flight resources.
    pub fn cached_resources(&self) -> usize {
        self.current().resources.cache.len()
    }

    fn generation(window: ThrottleWindow, store: Arc<S>, clock: Arc<dyn Clock>) -> Generation<S> {
        Generation {
            limiter: Arc::new(RateLimiter::new(window, clock.clone())),
            clock,
            resources: Arc::new(Resources::new(store)),
        }
    }

    fn current(&self) -> Arc<Generation<S>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, generation: Generation<S>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(generation);
    }
}

fn validate(client: &str, key: &str) -> Result<(), GatewayError> {
    if client.is_empty() {
        return Err(GatewayError::InvalidArgument { field: "client id" });
    }
    if key.is_empty() {
        return Err(GatewayError::InvalidArgument {
            field: "resource key",
        });
    }
    Ok(())
}
