//! HTTP image source.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::domain::errors::FetchError;
use crate::domain::ports::ImageSourcePort;

/// Downloads image bytes over HTTP(S). The id is the URL.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    /// Creates a source whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSourcePort for HttpImageSource {
    async fn fetch_bytes(&self, id: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(id)
            .send()
            .await
            .map_err(|e| FetchError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(format!("Failed to read body: {e}")))?;
        trace!(url = %id, len = bytes.len(), "Downloaded image bytes");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_a_network_error() {
        let source = HttpImageSource::new(Duration::from_secs(1)).unwrap();

        let err = source.fetch_bytes("not a url").await.unwrap_err();

        assert!(matches!(err, FetchError::Network(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_network_error() {
        let source = HttpImageSource::new(Duration::from_secs(1)).unwrap();

        let err = source
            .fetch_bytes("http://127.0.0.1:9/thumb.png")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Network(_)));
    }
}
