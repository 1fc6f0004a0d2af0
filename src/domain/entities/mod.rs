//! Domain entity definitions.

mod cache_key;
mod decoded_image;

pub use cache_key::CacheKey;
pub use decoded_image::{DecodedImage, ImageSource, ImageStatus, LoadedImage};
