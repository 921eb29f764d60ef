use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;

use crate::error::FetchError;
use crate::error::StoreError;

type Computation<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

struct Slot<V> {
    /// Distinguishes this computation from a later one under the same key.
    generation: u64,
    computation: Computation<V>,
}

/// Memoizes fetched resources by key, with at most one fetch in flight per key.
///
/// A slot holds a shared future rather than a value, so callers arriving while
/// a fetch is running all await that same fetch and see the same result.
/// Successful results stay until [`invalidate`](Self::invalidate) or
/// [`clear`](Self::clear). Failed fetches are dropped from the cache as soon as
/// they resolve, so the next caller fetches again.
pub struct ResourceCache<V> {
    slots: DashMap<String, Slot<V>>,
    generations: AtomicU64,
}

impl<V> fmt::Debug for ResourceCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("len", &self.slots.len())
            .finish()
    }
}

impl<V> Default for ResourceCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ResourceCache<V> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Drops the entry for `key`. Returns `true` if there was one.
    ///
    /// Callers already awaiting the dropped fetch still receive its result.
    pub fn invalidate(&self, key: &str) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    /// `true` if `key` has a completed or in-flight entry.
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<V> ResourceCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value cached under `key`, running `fetch` to produce it if
    /// nobody has yet.
    ///
    /// `fetch` is only called when the key has no entry, and the map shard for
    /// the key is locked while it builds its future, so it must not touch this
    /// cache. The future itself runs outside any map lock.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, StoreError>> + Send + 'static,
    {
        let (generation, computation) = match self.slots.entry(key.to_owned()) {
            Entry::Occupied(slot) => {
                tracing::trace!(key, "resource cache hit");
                let slot = slot.get();
                (slot.generation, slot.computation.clone())
            }
            Entry::Vacant(vacant) => {
                tracing::trace!(key, "resource cache miss");
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let computation = fetch().map(|res| res.map_err(FetchError::from)).boxed().shared();
                vacant.insert(Slot {
                    generation,
                    computation: computation.clone(),
                });
                (generation, computation)
            }
        };

        let res = computation.await;
        if res.is_err() {
            // Only forget the fetch that failed, not a newer one.
            self.slots
                .remove_if(key, |_, slot| slot.generation == generation);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Barrier;
    use tokio::sync::Notify;

    use super::*;

    fn counted(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send + 'static {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[tokio::test]
    async fn it_memoizes_values() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.get_or_fetch("id1", || counted(&calls, 1)).await.unwrap(), 1);
        assert_eq!(cache.get_or_fetch("id1", || counted(&calls, 2)).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("id1"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_fetch("id1", || counted(&calls, 1)).await.unwrap();
        assert!(cache.invalidate("id1"));
        assert!(!cache.invalidate("id1"));

        assert_eq!(cache.get_or_fetch("id1", || counted(&calls, 2)).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_memoized() {
        let cache = ResourceCache::<u32>::new();

        let err = cache
            .get_or_fetch("id1", || async { Err::<u32, StoreError>("provider down".into()) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "provider down");
        assert!(cache.is_empty());

        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(cache.get_or_fetch("id1", || counted(&calls, 7)).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_under_concurrency() {
        let cache = Arc::new(ResourceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let callers = 16;
        let barrier = Arc::new(Barrier::new(callers));

        let mut handles = vec![];
        for _ in 0..callers {
            let cache = cache.clone();
            let calls = calls.clone();
            let release = release.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cache
                    .get_or_fetch("id1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(42u32)
                    })
                    .await
            }));
        }

        // Let every caller pile onto the in-flight fetch
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_waiters();
        release.notify_one();

        let results = futures::future::join_all(handles).await;
        for res in results {
            assert_eq!(res.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_share_one_failure() {
        let cache = Arc::new(ResourceCache::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let release = release.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("id1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Err::<u32, StoreError>("boom".into())
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_waiters();
        release.notify_one();

        for res in futures::future::join_all(handles).await {
            assert_eq!(res.unwrap().unwrap_err().to_string(), "boom");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_evict_newer_fetch() {
        let cache = Arc::new(ResourceCache::<u32>::new());
        let release = Arc::new(Notify::new());

        let failing = {
            let cache = cache.clone();
            let release = release.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("id1", move || async move {
                        release.notified().await;
                        Err::<u32, StoreError>("stale failure".into())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        while !cache.contains("id1") {
            tokio::task::yield_now().await;
        }

        // A write lands and a fresh fetch fills the slot while the old one
        // is still running.
        cache.invalidate("id1");
        assert_eq!(cache.get_or_fetch("id1", || async { Ok(5) }).await.unwrap(), 5);

        release.notify_one();
        assert!(failing.await.unwrap().is_err());
        assert!(cache.contains("id1"));
    }
}
