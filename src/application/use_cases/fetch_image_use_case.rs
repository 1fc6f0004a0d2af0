//! Fetch use case: cache lookup, download, bounded decode, cache fill.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageReader};
use image::imageops::FilterType;
use tracing::{debug, trace, warn};

use crate::application::services::downsample::{
    DEFAULT_MAX_DOWNSAMPLE_ATTEMPTS, DownsamplePlan, plan_downsample,
};
use crate::domain::entities::{CacheKey, DecodedImage, ImageSource, LoadedImage};
use crate::domain::errors::FetchError;
use crate::domain::ports::{FetchListener, ImageCachePort, ImageSourcePort};

/// Resolves a decoded image no larger than the requested bounds.
///
/// A cached image larger than the requested bounds is scaled down with the
/// same plan a fresh download would get. On a miss the encoded bytes are
/// downloaded, the header is read to learn the natural size, a downsample
/// factor is planned, and the image is decoded and scaled on the blocking
/// pool. Only successful results are cached.
#[derive(Clone)]
pub struct FetchImageUseCase {
    cache: Arc<dyn ImageCachePort>,
    source: Arc<dyn ImageSourcePort>,
    max_downsample_attempts: u32,
}

impl FetchImageUseCase {
    /// Creates new fetch use case.
    #[must_use]
    pub fn new(cache: Arc<dyn ImageCachePort>, source: Arc<dyn ImageSourcePort>) -> Self {
        Self {
            cache,
            source,
            max_downsample_attempts: DEFAULT_MAX_DOWNSAMPLE_ATTEMPTS,
        }
    }

    /// Sets how many downsample factors are tried before giving up.
    #[must_use]
    pub const fn with_max_downsample_attempts(mut self, attempts: u32) -> Self {
        self.max_downsample_attempts = attempts;
        self
    }

    /// Fetches the image behind `id`, bounded by `max_width` x `max_height`.
    ///
    /// # Errors
    /// Returns error if the download fails, the bytes are not a decodable
    /// image, or no downsample factor fits the bounds.
    pub async fn fetch(
        &self,
        id: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<DecodedImage, FetchError> {
        self.load(id, max_width, max_height)
            .await
            .map(|loaded| loaded.image)
    }

    /// Same as [`fetch`](Self::fetch), also reporting the outcome to
    /// `listener`.
    ///
    /// # Errors
    /// See [`fetch`](Self::fetch).
    pub async fn fetch_with_listener(
        &self,
        id: &str,
        max_width: u32,
        max_height: u32,
        listener: &dyn FetchListener,
    ) -> Result<DecodedImage, FetchError> {
        let result = self.fetch(id, max_width, max_height).await;
        match &result {
            Ok(image) => listener.on_success(image),
            Err(e) => listener.on_error(e),
        }
        result
    }

    /// Fetches an image and reports which tier produced it.
    ///
    /// # Errors
    /// See [`fetch`](Self::fetch).
    pub async fn load(
        &self,
        id: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<LoadedImage, FetchError> {
        let key = CacheKey::derive(id);

        if let Some(hit) = self.cache.lookup(&key).await {
            trace!(id = %key, source = %hit.source, "Cache hit");
            return self.fit_cached(hit, max_width, max_height).await;
        }

        debug!(id = %key, url = %id, "Downloading image from network");
        let bytes = self.source.fetch_bytes(id).await.inspect_err(|e| {
            warn!(id = %key, error = %e, "Download failed");
        })?;

        let image = self
            .decode_bounded(&key, bytes, max_width, max_height)
            .await?;

        self.cache.put(key.clone(), image.clone());
        debug!(
            id = %key,
            width = image.width(),
            height = image.height(),
            source = "network",
            "Image loaded successfully"
        );

        Ok(LoadedImage {
            key,
            image,
            source: ImageSource::Network,
        })
    }

    /// Scales a cached image down to the bounds. The cached value is left
    /// untouched so larger requests can still use it.
    async fn fit_cached(
        &self,
        hit: LoadedImage,
        max_width: u32,
        max_height: u32,
    ) -> Result<LoadedImage, FetchError> {
        let plan = plan_downsample(
            hit.image.width(),
            hit.image.height(),
            max_width,
            max_height,
            self.max_downsample_attempts,
        )
        .inspect_err(|e| warn!(id = %hit.key, error = %e, "Cached image exceeds requested bounds"))?;
        if plan.is_identity() {
            return Ok(hit);
        }

        debug!(
            id = %hit.key,
            factor = plan.factor,
            width = plan.width,
            height = plan.height,
            "Scaling cached image to requested bounds"
        );
        let cached = hit.image.clone();
        let image = tokio::task::spawn_blocking(move || {
            DecodedImage::new(scale(cached.as_dynamic().clone(), plan))
        })
        .await
        .map_err(|e| FetchError::decode(format!("scale task panicked: {e}")))?;

        Ok(LoadedImage { image, ..hit })
    }

    async fn decode_bounded(
        &self,
        key: &CacheKey,
        bytes: Bytes,
        max_width: u32,
        max_height: u32,
    ) -> Result<DecodedImage, FetchError> {
        let (width, height) = read_dimensions(&bytes)?;
        let plan = plan_downsample(
            width,
            height,
            max_width,
            max_height,
            self.max_downsample_attempts,
        )
        .inspect_err(|e| warn!(id = %key, error = %e, "Image exceeds requested bounds"))?;
        trace!(
            id = %key,
            width,
            height,
            factor = plan.factor,
            attempts = plan.attempts,
            "Planned downsample"
        );

        tokio::task::spawn_blocking(move || decode_with_plan(&bytes, plan))
            .await
            .map_err(|e| FetchError::decode(format!("decode task panicked: {e}")))?
            .inspect_err(|e| warn!(id = %key, error = %e, "Decode failed"))
    }
}

impl std::fmt::Debug for FetchImageUseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchImageUseCase")
            .field("max_downsample_attempts", &self.max_downsample_attempts)
            .finish_non_exhaustive()
    }
}

/// Reads the natural dimensions from the image header without decoding
/// pixels.
fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), FetchError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(FetchError::decode)?
        .into_dimensions()
        .map_err(FetchError::decode)
}

fn decode_with_plan(bytes: &[u8], plan: DownsamplePlan) -> Result<DecodedImage, FetchError> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(FetchError::decode)?
        .decode()
        .map_err(FetchError::decode)?;

    Ok(DecodedImage::new(scale(decoded, plan)))
}

fn scale(image: DynamicImage, plan: DownsamplePlan) -> DynamicImage {
    if plan.is_identity() {
        image
    } else {
        image.resize_exact(plan.width, plan.height, FilterType::Triangle)
    }
}
