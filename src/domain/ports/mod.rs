mod fetch_listener_port;
mod image_cache_port;
mod image_source_port;

pub use fetch_listener_port::FetchListener;
pub use image_cache_port::ImageCachePort;
pub use image_source_port::ImageSourcePort;

#[cfg(test)]
pub mod mocks {
    pub use super::fetch_listener_port::mock::RecordingListener;
    pub use super::image_cache_port::mock::MockImageCache;
    pub use super::image_source_port::mock::{MockImageSource, encode_png};
}
