//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a key (128 bits).
const KEY_DIGEST_BYTES: usize = 16;

/// Opaque key under which an image is stored in both cache tiers.
///
/// Keys are the first 128 bits of the SHA-256 digest of the source
/// identifier, hex encoded. For `n` distinct identifiers the probability of
/// any collision is below `n² / 2^129`, so two different URLs sharing a slot
/// is not a practical concern. The encoded form is 32 lowercase hex
/// characters and is safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a source identifier (usually an image URL).
    #[must_use]
    pub fn derive(id: &str) -> Self {
        let digest = Sha256::digest(id.as_bytes());
        Self(hex::encode(&digest[..KEY_DIGEST_BYTES]))
    }

    /// Rebuilds a key from its encoded form, as read back from disk.
    ///
    /// Returns `None` unless `encoded` is exactly 32 lowercase hex characters.
    #[must_use]
    pub fn from_encoded(encoded: &str) -> Option<Self> {
        let valid = encoded.len() == KEY_DIGEST_BYTES * 2
            && encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(encoded.to_string()))
    }

    /// Returns the encoded key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
