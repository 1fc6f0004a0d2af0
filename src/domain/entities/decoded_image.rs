//! Domain types for decoded images.

use std::sync::Arc;

use image::DynamicImage;

use super::CacheKey;

/// A decoded image held by the caches.
///
/// Cloning is cheap: the pixel buffer is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pixels: Arc<DynamicImage>,
}

impl DecodedImage {
    /// Wraps a decoded image.
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self {
            pixels: Arc::new(image),
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Length of the pixel buffer in bytes. This is the weight used for
    /// memory-tier eviction.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.pixels.as_bytes().len()
    }

    /// Borrows the underlying image.
    #[must_use]
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Returns true if both handles share the same pixel buffer.
    #[must_use]
    pub fn shares_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl From<DynamicImage> for DecodedImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU cache.
    MemoryCache,
    /// Loaded from the persistent cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A resolved image together with its key and origin.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key of the image.
    pub key: CacheKey,
    /// The decoded image.
    pub image: DecodedImage,
    /// Where it came from.
    pub source: ImageSource,
}

/// Status of an image slot in the loading pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageStatus {
    /// Loading has not started.
    #[default]
    NotStarted,
    /// A fetch is in flight.
    Loading,
    /// The image is ready for display.
    Ready,
    /// Loading failed with an error message.
    Failed(String),
}

impl ImageStatus {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if a fetch is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if loading failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
