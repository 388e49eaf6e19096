// Response cache for read endpoints

use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default entry lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Thread-safe TTL cache keyed by request identity
///
/// Expired entries are evicted when looked up, never by a sweeper.
/// Concurrent misses on the same key share one fetch.
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,

    /// Per-key fetch locks for misses in progress
    fetching: Arc<DashMap<String, Arc<Mutex<()>>>>,

    ttl: Duration,
}

impl ResponseCache {
    /// Create a new cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            fetching: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key` under the default TTL
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_with_ttl(key, self.ttl)
    }

    /// Look up `key`, evicting it if older than `ttl`
    pub fn get_with_ttl(&self, key: &str, ttl: Duration) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh(ttl) {
                return Some(entry.value.clone());
            }
        }

        if self
            .entries
            .remove_if(key, |_, entry| !entry.is_fresh(ttl))
            .is_some()
        {
            tracing::debug!(key = %key, "Evicted expired cache entry");
        }
        None
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Return the cached value or run `fetcher` and store its result
    ///
    /// Errors are returned as-is and never cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get_with_ttl(key, ttl) {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(value);
        }

        let lock = self
            .fetching
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;

            // Another caller may have filled the entry while we waited
            if let Some(value) = self.get_with_ttl(key, ttl) {
                tracing::debug!(key = %key, "Cache filled by concurrent fetch");
                Ok(value)
            } else {
                tracing::debug!(key = %key, "Cache miss, fetching");
                let fetched = fetcher().await;
                if let Ok(value) = &fetched {
                    self.insert(key, value.clone());
                }
                fetched
            }
        };

        // Only the map and this handle left: nobody else is waiting on the key
        self.fetching
            .remove_if(key, |_, l| Arc::strong_count(l) <= 2);

        result
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        let count = self.entries.len();
        self.entries.clear();
        tracing::debug!("Invalidated response cache ({} entries)", count);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Clone for ResponseCache {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            fetching: Arc::clone(&self.fetching),
            ttl: self.ttl,
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn counting_fetch(calls: &AtomicUsize) -> Result<Value, String> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({ "call": n }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_once_within_ttl_and_again_after() {
        let cache = ResponseCache::default();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_fetch("k", DEFAULT_CACHE_TTL, || counting_fetch(&calls))
            .await
            .unwrap();
        let second = cache
            .get_or_fetch("k", DEFAULT_CACHE_TTL, || counting_fetch(&calls))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);

        tokio::time::advance(Duration::from_secs(31)).await;

        let third = cache
            .get_or_fetch("k", DEFAULT_CACHE_TTL, || counting_fetch(&calls))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(third, json!({ "call": 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = ResponseCache::default();
        let calls = AtomicUsize::new(0);

        let results = futures::future::join_all(
            (0..4).map(|_| cache.get_or_fetch("stats", DEFAULT_CACHE_TTL, || counting_fetch(&calls))),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), json!({ "call": 1 }));
        }
        assert!(cache.fetching.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_evicted_on_lookup() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.insert("wallet_balance", json!({"balance": 10.0}));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get("wallet_balance").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        // Still stored until someone looks
        assert_eq!(cache.len(), 1);
        assert!(cache.get("wallet_balance").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = ResponseCache::default();

        let err: Result<Value, String> = cache
            .get_or_fetch("k", DEFAULT_CACHE_TTL, || async { Err("boom".to_string()) })
            .await;
        assert_eq!(err.unwrap_err(), "boom");
        assert!(cache.is_empty());

        let ok: Result<Value, String> = cache
            .get_or_fetch("k", DEFAULT_CACHE_TTL, || async { Ok(json!(1)) })
            .await;
        assert_eq!(ok.unwrap(), json!(1));
    }

    #[test]
    fn test_invalidate_all_shared_between_clones() {
        let cache = ResponseCache::default();
        let clone = cache.clone();
        cache.insert("a", json!(1));
        cache.insert("b", json!(2));
        assert_eq!(clone.len(), 2);

        clone.invalidate_all();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }
}
