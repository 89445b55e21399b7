//! Response cache with LRU eviction and TTL expiration.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::fingerprint::Fingerprint;
use crate::response::Response;

/// A single cache entry with TTL tracking.
struct CacheEntry<V> {
    payload: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Response cache with LRU eviction and lazy TTL expiration.
///
/// `max_entries == 0` means unbounded.
pub struct ResponseCache<V = Response> {
    entries: HashMap<Fingerprint, CacheEntry<V>>,
    order: VecDeque<Fingerprint>,
    max_entries: usize,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries.min(1024)),
            order: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries,
            enabled,
            hits: 0,
            misses: 0,
        }
    }

    /// Get a cached payload by fingerprint.
    ///
    /// Returns `None` for missing or expired keys; an expired entry is removed.
    /// A hit moves the entry to the back of the LRU order.
    pub fn get(&mut self, key: &Fingerprint) -> Option<V> {
        if !self.enabled {
            self.misses += 1;
            return None;
        }

        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                self.entries.remove(key);
                self.order.retain(|k| k != key);
                self.misses += 1;
                return None;
            }

            let payload = entry.payload.clone();
            self.touch(key);
            self.hits += 1;
            return Some(payload);
        }

        self.misses += 1;
        None
    }

    /// Store a payload. Overwrites any previous entry for the same key.
    ///
    /// If the cache is at capacity, expired entries are dropped first and the
    /// least recently used live entry only if that frees no room.
    pub fn set(&mut self, key: Fingerprint, payload: V, ttl: Duration) {
        if !self.enabled {
            return;
        }

        let entry = CacheEntry {
            payload,
            inserted_at: Instant::now(),
            ttl,
        };

        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), entry);
            self.touch(&key);
            return;
        }

        if self.max_entries > 0 {
            if self.entries.len() >= self.max_entries {
                self.purge_expired();
            }
            while self.entries.len() >= self.max_entries {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(key.clone(), entry);
        self.order.push_back(key);
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn invalidate(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.has_prefix(prefix));
        self.order.retain(|k| !k.has_prefix(prefix));
        before - self.entries.len()
    }

    /// Drop expired entries eagerly.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            enabled: self.enabled,
            entries: self.entries.len(),
            max_entries: self.max_entries,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
        }
    }

    /// Clear all cache entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &Fingerprint) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
    }
}

/// Storage seam for cached responses.
///
/// Lookups are infallible from the gateway's point of view: a store that
/// cannot answer reports a miss.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &Fingerprint) -> Option<Response>;

    async fn set(&self, key: Fingerprint, payload: Response, ttl: Duration);

    async fn invalidate(&self, prefix: &str) -> usize;

    async fn stats(&self) -> CacheStats;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> usize;
}

/// In-process [`CacheStore`] guarding a [`ResponseCache`] with a mutex.
pub struct MemoryCache {
    inner: Mutex<ResponseCache<Response>>,
}

impl MemoryCache {
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(ResponseCache::new(enabled, max_entries)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.enabled, config.max_entries)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &Fingerprint) -> Option<Response> {
        self.inner.lock().get(key)
    }

    async fn set(&self, key: Fingerprint, payload: Response, ttl: Duration) {
        self.inner.lock().set(key, payload, ttl);
    }

    async fn invalidate(&self, prefix: &str) -> usize {
        self.inner.lock().invalidate(prefix)
    }

    async fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }

    async fn purge_expired(&self) -> usize {
        self.inner.lock().purge_expired()
    }
}
