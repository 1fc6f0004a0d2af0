//! Cache error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors raised by the cache tiers.
///
/// None of these reach a fetch caller: the coordinator logs them and treats
/// the operation as a miss or a no-op.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    /// The persistent tier could not be opened.
    #[error("failed to open persistent cache at {}: {message}", path.display())]
    Init { path: PathBuf, message: String },

    /// The journal could not be parsed.
    #[error("corrupt cache journal: {0}")]
    CorruptJournal(String),

    /// A read or write against the persistent tier failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An image could not be encoded for storage.
    #[error("failed to encode image: {0}")]
    Encode(String),

    /// A committed value exceeds the whole disk bound.
    #[error("value of {size} bytes exceeds the {max} byte cache bound")]
    EntryTooLarge { size: u64, max: u64 },

    /// The persistent tier failed to open earlier and is disabled.
    #[error("persistent cache unavailable")]
    Unavailable,
}

impl CacheError {
    /// Creates an init error for `path`.
    #[must_use]
    pub fn init(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Init {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Creates a corrupt journal error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptJournal(message.into())
    }
}
