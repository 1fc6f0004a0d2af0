//! Fetch error types.

use thiserror::Error;

/// Errors surfaced to fetch callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error(
        "{width}x{height} image does not fit {max_width}x{max_height} after {attempts} downsample attempts"
    )]
    DownsampleBoundsUnreachable {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
        attempts: u32,
    },
}

impl FetchError {
    /// Creates network error.
    #[must_use]
    pub fn network(message: impl std::fmt::Display) -> Self {
        Self::Network(message.to_string())
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            FetchError::network("timeout").to_string(),
            "network error: timeout"
        );
        assert_eq!(
            FetchError::decode("bad header").to_string(),
            "decode error: bad header"
        );
        let bounds = FetchError::DownsampleBoundsUnreachable {
            width: 4000,
            height: 4000,
            max_width: 10,
            max_height: 10,
            attempts: 5,
        };
        assert_eq!(
            bounds.to_string(),
            "4000x4000 image does not fit 10x10 after 5 downsample attempts"
        );
    }
}
