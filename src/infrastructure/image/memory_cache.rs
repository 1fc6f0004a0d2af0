//! In-memory LRU image cache bounded by decoded size.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, DecodedImage};

/// Default memory budget the tier is carved out of (256 MiB).
pub const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Default bound for the memory tier: one eighth of the memory budget.
pub const DEFAULT_MAX_MEMORY_BYTES: usize = DEFAULT_MEMORY_BUDGET / 8;

/// LRU map plus the byte total it accounts for. Both live under one lock so
/// that a replacement and the evictions it triggers are a single step.
struct Entries {
    lru: LruCache<CacheKey, DecodedImage>,
    size_bytes: usize,
}

impl Entries {
    fn remove(&mut self, key: &CacheKey) -> Option<DecodedImage> {
        let image = self.lru.pop(key)?;
        self.size_bytes -= image.size_bytes();
        Some(image)
    }
}

/// In-memory LRU cache for decoded images.
///
/// Entries are weighted by their pixel buffer length and the retained total
/// never exceeds `max_bytes`. All operations are synchronous and take a
/// short, non-async lock, so the cache is safe to share between concurrent
/// fetches on any thread.
pub struct MemoryImageCache {
    entries: Mutex<Entries>,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache that retains at most `max_bytes` of pixel data.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                size_bytes: 0,
            }),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default bound.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_MAX_MEMORY_BYTES)
    }

    /// Stores an image, evicting least recently used entries until the
    /// bound holds again.
    ///
    /// An image larger than the whole bound is not retained, and any older
    /// value under the same key is dropped. Returns whether the image was
    /// retained.
    pub fn put(&self, key: CacheKey, image: DecodedImage) -> bool {
        let mut entries = self.entries.lock();
        self.put_locked(&mut entries, key, image)
    }

    /// Stores an image only if the key is not already present.
    ///
    /// Used when promoting from a slower tier so that a value written in the
    /// meantime is never replaced by an older copy.
    pub fn insert_if_absent(&self, key: CacheKey, image: DecodedImage) -> bool {
        let mut entries = self.entries.lock();
        if entries.lru.contains(&key) {
            trace!(id = %key, "Memory cache already populated, skipping promotion");
            return false;
        }
        self.put_locked(&mut entries, key, image)
    }

    fn put_locked(&self, entries: &mut Entries, key: CacheKey, image: DecodedImage) -> bool {
        let size = image.size_bytes();
        if size > self.max_bytes {
            entries.remove(&key);
            debug!(
                id = %key,
                size = size,
                max_bytes = self.max_bytes,
                "Image exceeds memory cache bound, not retained"
            );
            return false;
        }

        if let Some(old) = entries.lru.put(key.clone(), image) {
            entries.size_bytes -= old.size_bytes();
        }
        entries.size_bytes += size;

        while entries.size_bytes > self.max_bytes {
            let Some((evicted, old)) = entries.lru.pop_lru() else {
                break;
            };
            entries.size_bytes -= old.size_bytes();
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(id = %evicted, size = old.size_bytes(), "Evicted from memory cache");
        }

        debug!(id = %key, size = size, total = entries.size_bytes, "Stored image in memory cache");
        true
    }

    /// Gets an image and marks it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<DecodedImage> {
        let mut entries = self.entries.lock();
        if let Some(image) = entries.lru.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(id = %key, "Memory cache hit");
            Some(image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(id = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<DecodedImage> {
        self.entries.lock().lru.peek(key).cloned()
    }

    /// Removes an image.
    pub fn remove(&self, key: &CacheKey) -> Option<DecodedImage> {
        let removed = self.entries.lock().remove(key);
        if removed.is_some() {
            debug!(id = %key, "Removed image from memory cache");
        }
        removed
    }

    /// Drops every entry.
    pub fn evict_all(&self) {
        let mut entries = self.entries.lock();
        entries.lru.clear();
        entries.size_bytes = 0;
        debug!("Cleared memory image cache");
    }

    /// Total pixel bytes currently retained.
    #[must_use]
    pub fn current_size_bytes(&self) -> usize {
        self.entries.lock().size_bytes
    }

    /// Configured bound in bytes.
    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let (size, size_bytes) = {
            let entries = self.entries.lock();
            (entries.lru.len(), entries.size_bytes)
        };
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            size,
            size_bytes,
            max_bytes: self.max_bytes,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

/// Statistics about memory cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries dropped to honour the bound.
    pub evictions: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Pixel bytes currently retained.
    pub size_bytes: usize,
    /// Configured bound in bytes.
    pub max_bytes: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {} images, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses, {} evictions)",
            self.size,
            self.size_bytes,
            self.max_bytes,
            self.hit_rate,
            self.hits,
            self.misses,
            self.evictions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const KB: u32 = 1024;

    /// A grayscale image whose pixel buffer is exactly `kb` KiB.
    fn image_of_kb(kb: u32) -> DecodedImage {
        DecodedImage::new(image::DynamicImage::new_luma8(KB, kb))
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(name)
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryImageCache::new(1024 * 1024);
        let img = image_of_kb(50);

        assert!(cache.put(key("k1"), img.clone()));
        let retrieved = cache.get(&key("k1")).unwrap();

        assert_eq!(retrieved, img);
        assert_eq!(cache.current_size_bytes(), 50 * 1024);
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::new(1024);
        assert!(cache.get(&key("nonexistent")).is_none());
    }

    #[test]
    fn test_lru_eviction_by_bytes() {
        let cache = MemoryImageCache::new(100 * 1024);

        cache.put(key("k1"), image_of_kb(50));
        assert!(cache.get(&key("k1")).is_some());

        cache.put(key("k2"), image_of_kb(40));
        cache.put(key("k3"), image_of_kb(40));

        // 130 KiB would exceed the bound, k1 is least recently used
        assert!(cache.get(&key("k1")).is_none());
        assert!(cache.get(&key("k2")).is_some());
        assert!(cache.get(&key("k3")).is_some());
        assert_eq!(cache.current_size_bytes(), 80 * 1024);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = MemoryImageCache::new(100 * 1024);

        cache.put(key("k1"), image_of_kb(40));
        cache.put(key("k2"), image_of_kb(40));
        let _ = cache.get(&key("k1"));
        cache.put(key("k3"), image_of_kb(40));

        assert!(cache.peek(&key("k1")).is_some());
        assert!(cache.peek(&key("k2")).is_none());
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(100 * 1024);

        cache.put(key("k1"), image_of_kb(40));
        cache.put(key("k2"), image_of_kb(40));
        let _ = cache.peek(&key("k1"));
        cache.put(key("k3"), image_of_kb(40));

        assert!(cache.peek(&key("k1")).is_none());
    }

    #[test]
    fn test_replacement_adjusts_size() {
        let cache = MemoryImageCache::new(100 * 1024);

        cache.put(key("k1"), image_of_kb(60));
        cache.put(key("k1"), image_of_kb(20));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size_bytes(), 20 * 1024);
    }

    #[test]
    fn test_oversized_image_not_retained() {
        let cache = MemoryImageCache::new(10 * 1024);

        cache.put(key("k1"), image_of_kb(5));
        assert!(!cache.put(key("k1"), image_of_kb(11)));

        assert!(cache.get(&key("k1")).is_none());
        assert_eq!(cache.current_size_bytes(), 0);
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let cache = MemoryImageCache::new(100 * 1024);
        let newer = image_of_kb(10);

        cache.put(key("k1"), newer.clone());
        assert!(!cache.insert_if_absent(key("k1"), image_of_kb(20)));

        assert!(cache.get(&key("k1")).unwrap().shares_buffer(&newer));
        assert!(cache.insert_if_absent(key("k2"), image_of_kb(20)));
    }

    #[test]
    fn test_remove_and_evict_all() {
        let cache = MemoryImageCache::new(100 * 1024);
        cache.put(key("k1"), image_of_kb(10));
        cache.put(key("k2"), image_of_kb(10));

        assert!(cache.remove(&key("k1")).is_some());
        assert_eq!(cache.current_size_bytes(), 10 * 1024);

        cache.evict_all();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size_bytes(), 0);
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(100 * 1024);
        cache.put(key("k1"), image_of_kb(1));

        let _ = cache.get(&key("k1"));
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.size_bytes, 1024);
    }

    #[test]
    fn test_concurrent_puts_respect_bound() {
        let cache = Arc::new(MemoryImageCache::new(64 * 1024));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let k = key(&format!("{t}-{i}"));
                        cache.put(k.clone(), image_of_kb(1 + (i % 7)));
                        let _ = cache.get(&k);
                        if i % 5 == 0 {
                            cache.remove(&k);
                        }
                        assert!(cache.current_size_bytes() <= 64 * 1024);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.size_bytes <= 64 * 1024);
        let recount: usize = {
            let entries = cache.entries.lock();
            entries.lru.iter().map(|(_, img)| img.size_bytes()).sum()
        };
        assert_eq!(recount, stats.size_bytes);
    }
}
