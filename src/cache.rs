//! Short-lived request cache for the calling layer
//!
//! Coalesces identical requests that arrive close together. Entries are
//! keyed by a hash of the serialized request body, expire after a fixed TTL
//! and are bounded in number. Expired entries are only removed by
//! [`RequestCache::sweep`] or when an insert needs room.
//!
//! ```rust,ignore
//! let cache = RequestCache::new(Duration::from_secs(30), 256);
//! let key = RequestCache::<GenerationOutcome>::key_for(&request)?;
//! if let Some(hit) = cache.get(key).await {
//!     return Ok(hit);
//! }
//! let outcome = orchestrator.orchestrate(&request, mode).await?;
//! cache.insert(key, outcome.clone()).await;
//! ```

use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_CAPACITY: usize = 256;

struct Entry<V> {
    value: V,
    inserted: Instant,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner<V> {
    entries: HashMap<u64, Entry<V>>,
    stats: CacheStats,
}

/// TTL- and capacity-bounded map from request hash to value
pub struct RequestCache<V> {
    inner: RwLock<Inner<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> RequestCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Stable key for a serializable request body
    pub fn key_for<T: Serialize>(body: &T) -> Result<u64, serde_json::Error> {
        let canonical = serde_json::to_string(body)?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Ok(hasher.finish())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live value for `key`, if any
    pub async fn get(&self, key: u64) -> Option<V> {
        let mut inner = self.inner.write().await;
        let ttl = self.ttl;
        let hit = inner
            .entries
            .get(&key)
            .filter(|e| e.inserted.elapsed() < ttl)
            .map(|e| e.value.clone());

        if hit.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        hit
    }

    /// Store `value`, evicting expired entries and then the oldest if full
    pub async fn insert(&self, key: u64, value: V) {
        let mut inner = self.inner.write().await;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let removed = Self::remove_expired(&mut inner, self.ttl);
            if removed == 0 {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted)
                    .map(|(k, _)| *k);
                if let Some(oldest) = oldest {
                    inner.entries.remove(&oldest);
                    inner.stats.evictions += 1;
                }
            }
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop expired entries; returns how many were removed
    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.write().await;
        let removed = Self::remove_expired(&mut inner, self.ttl);
        if removed > 0 {
            debug!(removed, remaining = inner.entries.len(), "Swept request cache");
        }
        removed
    }

    fn remove_expired(inner: &mut Inner<V>, ttl: Duration) -> usize {
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.inserted.elapsed() < ttl);
        let removed = before - inner.entries.len();
        inner.stats.evictions += removed as u64;
        removed
    }

    /// Entries held, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }
}

impl<V: Clone> Default for RequestCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl<V> std::fmt::Debug for RequestCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_stable_and_distinct() {
        let a = RequestCache::<u32>::key_for(&json!({"prompt": "x", "count": 3})).unwrap();
        let b = RequestCache::<u32>::key_for(&json!({"prompt": "x", "count": 3})).unwrap();
        let c = RequestCache::<u32>::key_for(&json!({"prompt": "x", "count": 4})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = RequestCache::new(Duration::from_secs(30), 8);
        cache.insert(1, "outcome").await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(1).await, Some("outcome"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(1).await, None);
        assert_eq!(cache.stats().await, CacheStats { hits: 1, misses: 1, evictions: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = RequestCache::new(Duration::from_secs(10), 8);
        cache.insert(1, 1).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.insert(2, 2).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.get(2).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = RequestCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 'a').await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert(2, 'b').await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert(3, 'c').await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(1).await, None);
        assert_eq!(cache.get(3).await, Some('c'));
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = RequestCache::new(Duration::from_secs(60), 1);
        cache.insert(7, 1).await;
        cache.insert(7, 2).await;
        assert_eq!(cache.get(7).await, Some(2));
        assert_eq!(cache.stats().await.evictions, 0);
    }
}
