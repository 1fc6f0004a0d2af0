//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with byte-weighted LRU eviction
//! - A journaled disk cache for persistence
//! - The coordinator unifying both tiers
//! - HTTP downloads and slot-based background loading

pub mod coordinator;
pub mod disk_cache;
pub mod http_source;
pub mod loader;
pub mod memory_cache;

pub use coordinator::{CacheCoordinator, CoordinatorConfig, CoordinatorStats, InitState};
pub use disk_cache::{Editor, PersistentCache, Snapshot};
pub use http_source::HttpImageSource;
pub use loader::{ImageLoadedEvent, ImageLoader, ImageLoaderConfig, SlotId};
pub use memory_cache::{CacheStats, MemoryImageCache};
