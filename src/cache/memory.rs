//! In-process LRU cache store with per-entry expiry

use async_trait::async_trait;
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::CacheStore;
use crate::error::{QualityError, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Bounded LRU store; least recently used entries are evicted at capacity
pub struct MemoryCacheStore {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| QualityError::StoreUnavailable("cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let found = entries
            .get(key)
            .map(|entry| (entry.is_live(now), entry.value.clone()));
        match found {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.lock()?.put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.pop(key).is_some())
    }

    async fn keys(&self, pattern: &Regex) -> Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.lock()?;
        Ok(entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && pattern.is_match(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        let entries = self.lock()?;
        Ok(entries.iter().filter(|(_, e)| e.is_live(now)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::glob_to_regex;

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let store = MemoryCacheStore::new(2);
        store.set("a", "1".into(), Duration::from_secs(60)).await.unwrap();
        store.set("b", "2".into(), Duration::from_secs(60)).await.unwrap();
        store.get("a").await.unwrap();
        store.set("c", "3".into(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_invisible() {
        let store = MemoryCacheStore::new(8);
        store.set("graph:1", "x".into(), Duration::from_secs(5)).await.unwrap();
        store.set("graph:2", "y".into(), Duration::from_secs(50)).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let keys = store.keys(&glob_to_regex("graph:*")).await.unwrap();
        assert_eq!(keys, vec!["graph:2".to_string()]);
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get("graph:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = MemoryCacheStore::new(4);
        store.set("k", "v".into(), Duration::from_secs(5)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }
}
