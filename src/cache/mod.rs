//! Cache layer for derived views
//!
//! Memoizes analytics aggregates, graph projections and generated insights
//! with TTL expiry. The cache is an accelerant only: when the backing store
//! is disabled or failing, every operation degrades to a miss or a no-op and
//! callers fall through to the uncached path.
//!
//! Concurrent misses on the same key are not coalesced; each caller runs its
//! own producer and the last write wins.

pub mod memory;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::Result;

pub use memory::MemoryCacheStore;

/// Key families derived from triple state; purged after every mutation
pub const TRIPLE_VIEW_PATTERNS: &[&str] = &["analytics:*", "graph:*", "insights:*"];

/// Fixed TTL tiers, chosen per call site by staleness tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// 1 minute
    Short,
    /// 5 minutes
    Medium,
    /// 30 minutes
    Long,
    /// 1 hour
    VeryLong,
    /// 24 hours
    Day,
}

impl CacheTtl {
    pub fn as_duration(&self) -> Duration {
        match self {
            CacheTtl::Short => Duration::from_secs(60),
            CacheTtl::Medium => Duration::from_secs(300),
            CacheTtl::Long => Duration::from_secs(1800),
            CacheTtl::VeryLong => Duration::from_secs(3600),
            CacheTtl::Day => Duration::from_secs(86400),
        }
    }
}

impl From<CacheTtl> for Duration {
    fn from(ttl: CacheTtl) -> Self {
        ttl.as_duration()
    }
}

/// Deterministic cache keys
pub mod keys {
    pub fn analytics(period: &str) -> String {
        format!("analytics:{}", period)
    }

    pub fn graph(limit: usize, min_confidence: f64, company: Option<&str>) -> String {
        match company {
            Some(company) => format!("graph:{}:{}:{}", limit, min_confidence, company),
            None => format!("graph:{}:{}", limit, min_confidence),
        }
    }

    pub fn insights(kind: &str) -> String {
        format!("insights:{}", kind)
    }
}

/// Raw key-value backend with TTL support
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Value for `key` if present and not expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any existing entry
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove `key`; returns whether an entry existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Live keys matching a compiled glob pattern
    async fn keys(&self, pattern: &Regex) -> Result<Vec<String>>;

    /// Number of live entries
    async fn len(&self) -> Result<usize>;
}

/// Translate a `*`/`?` wildcard pattern into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Regex {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    // Every non-wildcard character is escaped, so the pattern always compiles
    Regex::new(&re).unwrap_or_else(|_| Regex::new("^$").expect("static regex"))
}

/// Cache usage counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Typed cache wrapper shared by all read paths
pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store: Some(store),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            store: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            Self::new(Arc::new(MemoryCacheStore::new(config.capacity)))
        } else {
            debug!("Cache disabled by configuration");
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Deserialized value for `key`, or `None` on miss, expiry or store failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;

        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!("Cache get failed for {}: {}", key, e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.delete(key).await;
                None
            }
        }
    }

    /// Store `value` with expiry `now + ttl`
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: impl Into<Duration>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache value for {} is not serializable: {}", key, e);
                return;
            }
        };

        if let Err(e) = store.set(key, raw, ttl.into()).await {
            warn!("Cache set failed for {}: {}", key, e);
        }
    }

    /// Remove a single entry; absent keys are not an error
    pub async fn delete(&self, key: &str) {
        if let Some(store) = self.store.as_ref() {
            if let Err(e) = store.delete(key).await {
                warn!("Cache delete failed for {}: {}", key, e);
            }
        }
    }

    /// Remove every key matching a wildcard pattern; returns the number removed
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };

        let matcher = glob_to_regex(pattern);
        let keys = match store.keys(&matcher).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache key scan failed for {}: {}", pattern, e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match store.delete(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Cache delete failed for {}: {}", key, e),
            }
        }

        debug!("Invalidated {} cache entries matching {}", removed, pattern);
        removed
    }

    /// Purge every view family that depends on triple state
    pub async fn invalidate_triple_views(&self) -> usize {
        let mut total = 0;
        for pattern in TRIPLE_VIEW_PATTERNS {
            total += self.invalidate_pattern(pattern).await;
        }
        total
    }

    /// Return the cached value for `key`, or run `producer` once and cache its result.
    ///
    /// Producer errors propagate and nothing is stored.
    pub async fn with_cache<T, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Duration>,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = match self.store.as_ref() {
            Some(store) => store.len().await.unwrap_or(0),
            None => 0,
        };
        CacheStats {
            enabled: self.is_enabled(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QualityError;
    use std::sync::atomic::AtomicUsize;

    struct UnreachableStore;

    #[async_trait]
    impl CacheStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(QualityError::StoreUnavailable("cache down".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(QualityError::StoreUnavailable("cache down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(QualityError::StoreUnavailable("cache down".into()))
        }
        async fn keys(&self, _pattern: &Regex) -> Result<Vec<String>> {
            Err(QualityError::StoreUnavailable("cache down".into()))
        }
        async fn len(&self) -> Result<usize> {
            Err(QualityError::StoreUnavailable("cache down".into()))
        }
    }

    fn memory_cache() -> Cache {
        Cache::new(Arc::new(MemoryCacheStore::new(64)))
    }

    #[test]
    fn test_ttl_tiers() {
        assert_eq!(CacheTtl::Short.as_duration(), Duration::from_secs(60));
        assert_eq!(CacheTtl::Day.as_duration(), Duration::from_secs(86400));
        assert!(CacheTtl::Long.as_duration() < CacheTtl::VeryLong.as_duration());
    }

    #[test]
    fn test_keys_are_deterministic() {
        assert_eq!(keys::analytics("7d"), "analytics:7d");
        assert_eq!(keys::graph(100, 0.7, None), "graph:100:0.7");
        assert_eq!(keys::graph(50, 0.5, Some("company:acme")), "graph:50:0.5:company:acme");
        assert_eq!(keys::insights("network"), "insights:network");
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("analytics:*");
        assert!(re.is_match("analytics:7d"));
        assert!(re.is_match("analytics:"));
        assert!(!re.is_match("graph:analytics:7d"));

        let re = glob_to_regex("graph:10?:0.7");
        assert!(re.is_match("graph:100:0.7"));
        assert!(!re.is_match("graph:100:0x7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_get_and_expiry() {
        let cache = memory_cache();
        cache.set("analytics:7d", &vec![1, 2, 3], Duration::from_secs(60)).await;

        let value: Option<Vec<i32>> = cache.get("analytics:7d").await;
        assert_eq!(value, Some(vec![1, 2, 3]));

        tokio::time::advance(Duration::from_secs(61)).await;
        let expired: Option<Vec<i32>> = cache.get("analytics:7d").await;
        assert_eq!(expired, None);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_delete_is_idempotent() {
        let cache = memory_cache();
        cache.set("k", &"first", CacheTtl::Short).await;
        cache.set("k", &"second", CacheTtl::Short).await;
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("second"));

        cache.delete("k").await;
        cache.delete("k").await;
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_counts() {
        let cache = memory_cache();
        cache.set("analytics:7d", &1, CacheTtl::Long).await;
        cache.set("analytics:30d", &2, CacheTtl::Long).await;
        cache.set("graph:100:0.7", &3, CacheTtl::Long).await;

        assert_eq!(cache.invalidate_pattern("analytics:*").await, 2);
        assert_eq!(cache.get::<i32>("analytics:7d").await, None);
        assert_eq!(cache.get::<i32>("graph:100:0.7").await, Some(3));

        cache.set("insights:health", &4, CacheTtl::Day).await;
        assert_eq!(cache.invalidate_triple_views().await, 2);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_with_cache_invokes_producer_once() {
        let cache = memory_cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let value: u32 = cache
                .with_cache("analytics:all", CacheTtl::Long, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_cache_recomputes_after_ttl() {
        let cache = memory_cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let produce = move || async move {
            Ok::<_, QualityError>(calls.fetch_add(1, Ordering::SeqCst))
        };

        assert_eq!(cache.with_cache("k", CacheTtl::Short, produce).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.with_cache("k", CacheTtl::Short, produce).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.with_cache("k", CacheTtl::Short, produce).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_with_cache_does_not_store_errors() {
        let cache = memory_cache();
        let result: Result<u32> = cache
            .with_cache("k", CacheTtl::Short, || async {
                Err(QualityError::ExternalService("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_miss() {
        let cache = Cache::new(Arc::new(UnreachableStore));
        cache.set("k", &1, CacheTtl::Short).await;
        assert_eq!(cache.get::<i32>("k").await, None);
        cache.delete("k").await;
        assert_eq!(cache.invalidate_pattern("*").await, 0);

        let value: i32 = cache
            .with_cache("k", CacheTtl::Short, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_pass_through() {
        let cache = Cache::disabled();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        for _ in 0..2 {
            cache
                .with_cache("k", CacheTtl::Short, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1u8)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.stats().await.enabled);
    }
}
