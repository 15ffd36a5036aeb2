use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;
use tracing::debug;

/// Cached entry: payload plus its accounted size.
struct CacheEntry<V> {
    size_bytes: u64,
    payload: V,
}

struct CacheInner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    current_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub current_bytes: u64,
    pub capacity_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded key → payload store with least-recently-used eviction.
///
/// Capacity is counted in bytes as declared by the caller on `add`, not in
/// entries. The sum of entry sizes never exceeds `capacity_bytes`. All
/// operations take one internal lock; the cache never calls out while holding
/// it.
pub struct CacheManager<V> {
    inner: Mutex<CacheInner<V>>,
    capacity_bytes: u64,
}

impl<V: Clone> CacheManager<V> {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                current_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `payload` at the most-recently-used position.
    ///
    /// Returns `false` (and leaves the cache untouched) when `size_bytes`
    /// exceeds the total capacity. Otherwise evicts from the LRU end until the
    /// entry fits. Re-adding an existing key replaces it.
    pub fn add(&self, key: impl Into<String>, payload: V, size_bytes: u64) -> bool {
        if size_bytes > self.capacity_bytes {
            debug!(size_bytes, capacity = self.capacity_bytes, "cache entry larger than capacity, rejected");
            return false;
        }

        let key = key.into();
        let mut inner = self.lock();

        if let Some(old) = inner.entries.pop(&key) {
            inner.current_bytes = inner.current_bytes.saturating_sub(old.size_bytes);
        }

        while inner.current_bytes + size_bytes > self.capacity_bytes {
            if !Self::remove_oldest(&mut inner) {
                return false;
            }
        }

        inner.entries.put(key, CacheEntry { size_bytes, payload });
        inner.current_bytes += size_bytes;
        true
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let found = inner.entries.get(key).map(|entry| entry.payload.clone());
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Membership check without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let entry = inner.entries.pop(key)?;
        inner.current_bytes = inner.current_bytes.saturating_sub(entry.size_bytes);
        Some(entry.payload)
    }

    /// Evict LRU entries until at least `target_bytes` have been freed or the
    /// cache is empty. Returns the bytes actually freed.
    pub fn evict_bytes(&self, target_bytes: u64) -> u64 {
        let mut inner = self.lock();
        let before = inner.current_bytes;
        while before - inner.current_bytes < target_bytes {
            if !Self::remove_oldest(&mut inner) {
                break;
            }
        }
        before - inner.current_bytes
    }

    /// Evict LRU entries until the cache holds at most `limit_bytes`.
    pub fn trim_to(&self, limit_bytes: u64) -> u64 {
        let mut inner = self.lock();
        let before = inner.current_bytes;
        while inner.current_bytes > limit_bytes {
            if !Self::remove_oldest(&mut inner) {
                break;
            }
        }
        before - inner.current_bytes
    }

    /// Drop every entry. Returns the bytes freed.
    pub fn clear(&self) -> u64 {
        let mut inner = self.lock();
        let freed = inner.current_bytes;
        inner.evictions += inner.entries.len() as u64;
        inner.entries.clear();
        inner.current_bytes = 0;
        freed
    }

    pub fn current_size(&self) -> u64 {
        self.lock().current_bytes
    }

    pub fn capacity(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            current_bytes: inner.current_bytes,
            capacity_bytes: self.capacity_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    fn remove_oldest(inner: &mut CacheInner<V>) -> bool {
        match inner.entries.pop_lru() {
            Some((key, entry)) => {
                debug!(key = %key, size_bytes = entry.size_bytes, "evicting cache entry");
                inner.current_bytes = inner.current_bytes.saturating_sub(entry.size_bytes);
                inner.evictions += 1;
                true
            }
            None => false,
        }
    }
}
