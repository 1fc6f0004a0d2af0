//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, DecodedImage, ImageSource, LoadedImage};
pub use errors::{CacheError, CacheResult, FetchError};
pub use ports::{FetchListener, ImageCachePort, ImageSourcePort};
