//! Port definition for image caching.

use async_trait::async_trait;

use crate::domain::entities::{CacheKey, DecodedImage, LoadedImage};

/// Port for the two-tier image cache.
/// Implementations must be thread-safe.
#[async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Looks an image up in every tier, reporting which tier answered.
    async fn lookup(&self, key: &CacheKey) -> Option<LoadedImage>;

    /// Attempts to get an image from the cache.
    /// Returns None if no tier holds it.
    async fn get(&self, key: &CacheKey) -> Option<DecodedImage> {
        self.lookup(key).await.map(|loaded| loaded.image)
    }

    /// Stores an image. The fast tier is written before returning; slower
    /// tiers may be written in the background.
    fn put(&self, key: CacheKey, image: DecodedImage);

    /// Removes an image from every tier.
    async fn remove(&self, key: &CacheKey);

    /// Clears every tier.
    async fn clear_all(&self);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::domain::entities::ImageSource;

    /// Map-backed cache that counts writes.
    #[derive(Default)]
    pub struct MockImageCache {
        images: Mutex<HashMap<CacheKey, DecodedImage>>,
        puts: AtomicUsize,
    }

    impl MockImageCache {
        /// Creates an empty cache.
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of `put` calls observed.
        pub fn put_count(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        /// Number of stored images.
        pub fn len(&self) -> usize {
            self.images.lock().len()
        }
    }

    #[async_trait]
    impl ImageCachePort for MockImageCache {
        async fn lookup(&self, key: &CacheKey) -> Option<LoadedImage> {
            self.images.lock().get(key).map(|image| LoadedImage {
                key: key.clone(),
                image: image.clone(),
                source: ImageSource::MemoryCache,
            })
        }

        fn put(&self, key: CacheKey, image: DecodedImage) {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.images.lock().insert(key, image);
        }

        async fn remove(&self, key: &CacheKey) {
            self.images.lock().remove(key);
        }

        async fn clear_all(&self) {
            self.images.lock().clear();
        }
    }
}
