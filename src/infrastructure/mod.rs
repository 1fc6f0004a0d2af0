//! Infrastructure layer with cache tiers and external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, downloading, background loading).
pub mod image;

pub use config::{CacheConfig, CliArgs, Command, ConfigStore, LogLevel};
pub use self::image::{
    CacheCoordinator, CacheStats, CoordinatorConfig, HttpImageSource, ImageLoadedEvent,
    ImageLoader, ImageLoaderConfig, InitState, MemoryImageCache, PersistentCache,
};
