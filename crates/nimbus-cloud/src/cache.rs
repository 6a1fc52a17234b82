//! Size/count/TTL-bounded cache tier with LRU eviction
//!
//! One parametric [`Cache`] covers every caching need; the specialized
//! constructors differ only in their caps and TTLs (schemas, HTTP
//! responses, query results).

use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::transport::TransportResponse;

/// Estimated in-memory footprint of a cached value
pub trait EstimateSize {
    fn estimated_size(&self) -> usize;
}

impl EstimateSize for String {
    fn estimated_size(&self) -> usize {
        self.chars().count() * 2
    }
}

impl EstimateSize for bytes::Bytes {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl EstimateSize for Vec<u8> {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl EstimateSize for serde_json::Value {
    fn estimated_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len() * 2).unwrap_or(0)
    }
}

impl EstimateSize for Vec<serde_json::Value> {
    fn estimated_size(&self) -> usize {
        self.iter().map(EstimateSize::estimated_size).sum()
    }
}

impl EstimateSize for TransportResponse {
    fn estimated_size(&self) -> usize {
        let header_bytes: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        self.body.len() + header_bytes
    }
}

/// Limits for one cache instance
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_bytes: usize,
    pub max_entries: usize,
    pub max_age: Duration,
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    /// File schema cache: 10 MB, 2 h, 500 entries
    pub fn schemas() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_entries: 500,
            max_age: Duration::from_secs(2 * 60 * 60),
            cleanup_interval: Duration::from_secs(10 * 60),
        }
    }

    /// HTTP response cache: 50 MB, 30 min, 200 entries
    pub fn http_responses() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            max_entries: 200,
            max_age: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }

    /// Query result cache: 200 MB, 15 min, 100 entries
    pub fn query_results() -> Self {
        Self {
            max_bytes: 200 * 1024 * 1024,
            max_entries: 100,
            max_age: Duration::from_secs(15 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    size: usize,
    expires_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

struct Inner<V> {
    entries: LruCache<String, Entry<V>>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// LRU cache bounded by aggregate byte size, entry count and age
pub struct Cache<V> {
    name: &'static str,
    config: CacheConfig,
    inner: Mutex<Inner<V>>,
}

impl<V: EstimateSize + Clone + Send + 'static> Cache<V> {
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Insert a value, evicting least-recently-used entries until it fits.
    ///
    /// A value larger than the byte cap is never stored; the call is a
    /// no-op returning `false`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> bool {
        let key = key.into();
        let size = value.estimated_size();
        if size > self.config.max_bytes {
            debug!(
                cache = self.name,
                key = %key,
                size,
                "Value exceeds cache byte cap, not stored"
            );
            return false;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(&key) {
            inner.total_bytes -= old.size;
        }

        while inner.total_bytes + size > self.config.max_bytes
            || inner.entries.len() + 1 > self.config.max_entries
        {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes -= evicted.size;
                    inner.evictions += 1;
                }
                None => break,
            }
        }

        let max_age = ttl.unwrap_or(self.config.max_age);
        inner.entries.put(
            key,
            Entry {
                value,
                size,
                expires_at: now + max_age,
                last_accessed: now,
                access_count: 0,
            },
        );
        inner.total_bytes += size;
        true
    }

    /// Look up a value; expired entries are removed and count as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = inner.entries.peek(key).map(|e| e.expires_at <= now);
        match expired {
            None => {
                inner.misses += 1;
                None
            }
            Some(true) => {
                if let Some(entry) = inner.entries.pop(key) {
                    inner.total_bytes -= entry.size;
                }
                inner.misses += 1;
                None
            }
            Some(false) => {
                inner.hits += 1;
                let entry = inner.entries.get_mut(key).expect("entry present");
                entry.last_accessed = now;
                entry.access_count += 1;
                Some(entry.value.clone())
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired = inner.entries.peek(key).map(|e| e.expires_at <= now);
        match expired {
            None => false,
            Some(true) => {
                if let Some(entry) = inner.entries.pop(key) {
                    inner.total_bytes -= entry.size;
                }
                false
            }
            Some(false) => true,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.pop(key) {
            Some(entry) => {
                inner.total_bytes -= entry.size;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = inner.entries.pop(key) {
                inner.total_bytes -= entry.size;
            }
        }
        if !expired.is_empty() {
            debug!(cache = self.name, removed = expired.len(), "Cache cleanup");
        }
        expired.len()
    }

    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
