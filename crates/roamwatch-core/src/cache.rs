// # Result Cache
//
// Short-TTL, process-wide cache for facts derived from the controller
// (AP directory, gateway system info). Multiple readers observe one shared,
// recently-fetched value instead of each issuing its own upstream call.
//
// ## Concurrency
//
// The whole map lives behind an `ArcSwap`. Readers load a snapshot without
// locking; writers build a new map and swap it in with `rcu`. Readers never
// block writers and vice versa.
//
// ## Expiry
//
// Entries carry a `tokio::time::Instant` deadline, so paused-time tests can
// advance past a TTL deterministically. Expired entries are invisible to
// `get` and are dropped on the next write.
//
// ## Errors
//
// Failed fetches are never cached: `get_or_fetch` stores only successes.

use arc_swap::ArcSwap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// One cached value
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

type Entries = HashMap<String, Arc<CacheEntry>>;

/// Shared result cache
pub struct ResultCache {
    entries: ArcSwap<Entries>,
    default_ttl: Duration,
    closed: AtomicBool,
}

impl ResultCache {
    /// Create a cache whose `set_default` uses `default_ttl`
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            default_ttl,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        Self::new(config.default_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cached value, only while `now < expires_at`
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        self.entries
            .load()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    /// Cached value decoded as `T`. A value that no longer decodes is a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("Cached value for '{}' did not decode: {}", key, e);
                None
            }
        }
    }

    /// Replace the value for `key` atomically
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Duration) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!("Result cache closed, dropping write");
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let entry = Arc::new(CacheEntry {
            value,
            expires_at: now + ttl,
        });

        self.entries.rcu(|current| {
            let mut next: Entries = current
                .iter()
                .filter(|(_, e)| e.is_live(now))
                .map(|(k, e)| (k.clone(), Arc::clone(e)))
                .collect();
            next.insert(key.clone(), Arc::clone(&entry));
            next
        });
    }

    /// `set` with the configured default TTL
    pub fn set_default(&self, key: impl Into<String>, value: serde_json::Value) {
        self.set(key, value, self.default_ttl);
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.rcu(|current| {
            let mut next = Entries::clone(current);
            next.remove(key);
            next
        });
    }

    pub fn invalidate_all(&self) {
        self.entries.store(Arc::new(HashMap::new()));
    }

    /// Drop all entries and refuse further writes
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.invalidate_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.load().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value, or run `fetch` and cache its success.
    ///
    /// An error from `fetch` is returned as-is and leaves the key untouched.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, crate::Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, crate::Error>>,
    {
        if let Some(hit) = self.get_as::<T>(key) {
            tracing::trace!("Result cache hit: {}", key);
            return Ok(hit);
        }

        tracing::trace!("Result cache miss: {}", key);
        let value = fetch().await?;
        self.set(key, serde_json::to_value(&value)?, ttl);
        Ok(value)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.len())
            .field("default_ttl", &self.default_ttl)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn set_then_get_until_ttl_elapses() {
        let cache = ResultCache::new(Duration::from_secs(30));
        cache.set("gateway_info", json!({"version": "8.1"}), Duration::from_secs(30));

        assert_eq!(cache.get("gateway_info"), Some(json!({"version": "8.1"})));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get("gateway_info").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("gateway_info"), None);
    }

    #[tokio::test]
    async fn invalidate_single_and_all() {
        let cache = ResultCache::new(Duration::from_secs(30));
        cache.set_default("a", json!(1));
        cache.set_default("b", json!(2));

        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn get_or_fetch_caches_only_success() {
        let cache = ResultCache::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);

        let failed: Result<u32, _> = cache
            .get_or_fetch("n", Duration::from_secs(30), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(crate::Error::upstream("controller down"))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.get("n"), None);

        for _ in 0..3 {
            let v: u32 = cache
                .get_or_fetch("n", Duration::from_secs(30), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(v, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_cache_ignores_writes() {
        let cache = ResultCache::new(Duration::from_secs(30));
        cache.set_default("a", json!(1));
        cache.close();
        assert_eq!(cache.get("a"), None);

        cache.set_default("a", json!(2));
        assert_eq!(cache.get("a"), None);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_keys() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(30)));
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.set_default(format!("k{}", i), json!(i));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len(), 16);
    }
}
