//! Port definition for fetching raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::FetchError;

/// Port for downloading encoded image bytes.
#[async_trait]
pub trait ImageSourcePort: Send + Sync {
    /// Fetches the encoded bytes behind `id` (usually a URL).
    async fn fetch_bytes(&self, id: &str) -> Result<Bytes, FetchError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{DynamicImage, ImageFormat};

    /// In-memory byte source that counts requests.
    #[derive(Default)]
    pub struct MockImageSource {
        payloads: HashMap<String, Bytes>,
        requests: AtomicUsize,
    }

    impl MockImageSource {
        /// Creates a source with no payloads; every request fails.
        pub fn new() -> Self {
            Self::default()
        }

        /// Serves a PNG of the given dimensions for `id`.
        pub fn with_png(mut self, id: &str, width: u32, height: u32) -> Self {
            self.payloads
                .insert(id.to_string(), Bytes::from(encode_png(width, height)));
            self
        }

        /// Serves arbitrary bytes for `id`.
        pub fn with_bytes(mut self, id: &str, bytes: impl Into<Bytes>) -> Self {
            self.payloads.insert(id.to_string(), bytes.into());
            self
        }

        /// Number of requests served or failed so far.
        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    /// Encodes a gradient PNG so decoded pixels are not uniform.
    pub fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("png encoding to memory");
        out.into_inner()
    }

    #[async_trait]
    impl ImageSourcePort for MockImageSource {
        async fn fetch_bytes(&self, id: &str) -> Result<Bytes, FetchError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.payloads
                .get(id)
                .cloned()
                .ok_or_else(|| FetchError::network(format!("HTTP 404 for {id}")))
        }
    }
}
