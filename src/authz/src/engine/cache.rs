//! Filter-outcome cache
//!
//! Filter-mode outcomes depend only on the schema generation, the type, the
//! operation, and the claims, so they can be reused across requests carrying
//! the same claims. Gate results depend on stored data and are never cached.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use blake3::Hasher;

use super::evaluator::FilterOutcome;
use crate::claims::ClaimSet;
use crate::rules::Operation;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Time-to-live for cached outcomes
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Cache key type (BLAKE3 hash)
type CacheKey = [u8; 32];

/// Cached entry with TTL
#[derive(Clone)]
struct CachedEntry {
    outcome: FilterOutcome,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(outcome: FilterOutcome) -> Self {
        Self {
            outcome,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// What a cached outcome was computed for
#[derive(Debug, Clone, Copy)]
pub struct OutcomeKey<'a> {
    pub generation: u64,
    pub type_name: &'a str,
    pub op: Operation,
    pub claims: &'a ClaimSet,
}

/// Filter-outcome cache
///
/// Provides:
/// - In-memory cache with DashMap (thread-safe, lock-free reads)
/// - TTL-based expiration
/// - BLAKE3 hashing for cache keys
pub struct FilterCache {
    memory_cache: Arc<DashMap<CacheKey, CachedEntry>>,
    config: CacheConfig,
    stats: Arc<DashMap<&'static str, usize>>,
}

impl FilterCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            memory_cache: Arc::new(DashMap::new()),
            config,
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Get a cached outcome
    pub async fn get(&self, key: &OutcomeKey<'_>) -> Option<FilterOutcome> {
        let key = Self::compute_key(key);

        if let Some(entry) = self.memory_cache.get(&key) {
            if entry.is_expired(self.config.ttl) {
                drop(entry);
                self.memory_cache.remove(&key);
                self.increment_stat("expirations");
                self.increment_stat("misses");
                return None;
            }

            self.increment_stat("hits");
            return Some(entry.outcome.clone());
        }

        self.increment_stat("misses");
        None
    }

    /// Store an outcome
    pub async fn put(&self, key: &OutcomeKey<'_>, outcome: FilterOutcome) {
        let key = Self::compute_key(key);

        if self.memory_cache.len() >= self.config.capacity {
            self.evict().await;
        }

        self.memory_cache.insert(key, CachedEntry::new(outcome));
    }

    /// Clear the entire cache
    pub async fn clear(&self) {
        self.memory_cache.clear();
        self.stats.clear();
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            entries: self.memory_cache.len(),
            max_entries: self.config.capacity,
        }
    }

    fn compute_key(key: &OutcomeKey<'_>) -> CacheKey {
        let mut hasher = Hasher::new();

        hasher.update(&key.generation.to_le_bytes());
        hasher.update(key.type_name.as_bytes());
        hasher.update(&[0]);
        hasher.update(key.op.as_str().as_bytes());

        // Claims iterate in name order
        for (name, value) in key.claims.iter() {
            hasher.update(&[0]);
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.to_value().to_string().as_bytes());
        }

        *hasher.finalize().as_bytes()
    }

    /// Drop expired entries, then the oldest tenth if still at capacity
    async fn evict(&self) {
        let ttl = self.config.ttl;
        self.memory_cache.retain(|_, entry| !entry.is_expired(ttl));
        if self.memory_cache.len() < self.config.capacity {
            return;
        }

        let mut ages: Vec<(CacheKey, Instant)> = self
            .memory_cache
            .iter()
            .map(|entry| (*entry.key(), entry.value().cached_at))
            .collect();
        ages.sort_by_key(|(_, cached_at)| *cached_at);

        let to_remove = (self.config.capacity / 10).max(1);
        for (key, _) in ages.into_iter().take(to_remove) {
            self.memory_cache.remove(&key);
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;

    fn key<'a>(claims: &'a ClaimSet, generation: u64) -> OutcomeKey<'a> {
        OutcomeKey {
            generation,
            type_name: "Todo",
            op: Operation::Query,
            claims,
        }
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = FilterCache::new(CacheConfig::default());
        let claims = ClaimSet::new().with_claim("USER", "amit");
        let outcome = FilterOutcome::Restricted(Filter::eq("owner", "amit"));

        assert!(cache.get(&key(&claims, 1)).await.is_none());
        cache.put(&key(&claims, 1), outcome.clone()).await;
        assert_eq!(cache.get(&key(&claims, 1)).await, Some(outcome));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_key_covers_claims_and_generation() {
        let cache = FilterCache::new(CacheConfig::default());
        let amit = ClaimSet::new().with_claim("USER", "amit");
        let bea = ClaimSet::new().with_claim("USER", "bea");

        cache.put(&key(&amit, 1), FilterOutcome::Unrestricted).await;
        assert!(cache.get(&key(&bea, 1)).await.is_none());
        assert!(cache.get(&key(&amit, 2)).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_ttl() {
        let config = CacheConfig {
            ttl: Duration::from_millis(50),
            ..Default::default()
        };
        let cache = FilterCache::new(config);
        let claims = ClaimSet::new();

        cache.put(&key(&claims, 1), FilterOutcome::Denied).await;
        assert!(cache.get(&key(&claims, 1)).await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get(&key(&claims, 1)).await.is_none());
        assert!(cache.stats().await.expirations > 0);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let config = CacheConfig {
            capacity: 10,
            ..Default::default()
        };
        let cache = FilterCache::new(config);
        let claims = ClaimSet::new();

        for generation in 0..25 {
            cache.put(&key(&claims, generation), FilterOutcome::Denied).await;
        }
        assert!(cache.stats().await.entries <= 10);
    }
}
