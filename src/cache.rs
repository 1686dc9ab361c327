//! Bounded address-keyed caches.
//!
//! [`AddressCache`] memoizes lookups keyed by a chain address or hash
//! (transaction → sender, pair → tokens, price bucket → price). Entries are
//! evicted least-recently-used once the configured capacity is reached.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;

/// LRU cache shared between concurrent lookups.
///
/// The lock is never held across the fetch, so two concurrent misses for
/// the same key may both hit upstream; the later insert wins.
#[derive(Debug)]
pub struct AddressCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> AddressCache<K, V> {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a cached value and marks it recently used.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Stores a value, evicting the least recently used entry when full.
    pub async fn insert(&self, key: K, value: V) {
        self.inner.lock().await.put(key, value);
    }

    /// Returns the cached value or resolves it with `fetch` and caches it.
    ///
    /// # Errors
    ///
    /// Propagates the error of `fetch`; failures are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key).await {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }
}
