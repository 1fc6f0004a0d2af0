//! Transactional write handle and read snapshots.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::PersistentCache;
use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

const IO_BUFFER_SIZE: usize = 8 * 1024;

/// Write handle for one entry.
///
/// Bytes are staged in a temporary file in the cache directory. The edit
/// ends in exactly one of [`commit`](Self::commit) or
/// [`abort`](Self::abort); dropping the editor aborts. After any failed
/// write, `commit` aborts instead and reports the failure, so partial data
/// is never published.
pub struct Editor<'a> {
    cache: &'a mut PersistentCache,
    key: CacheKey,
    out: Option<BufWriter<NamedTempFile>>,
    failed: bool,
}

impl<'a> Editor<'a> {
    pub(super) fn new(cache: &'a mut PersistentCache, key: CacheKey, staging: NamedTempFile) -> Self {
        Self {
            cache,
            key,
            out: Some(BufWriter::with_capacity(IO_BUFFER_SIZE, staging)),
            failed: false,
        }
    }

    /// Key being edited.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Publishes the written bytes as the entry's value.
    ///
    /// # Errors
    /// Returns error if an earlier write failed, or if the value cannot be
    /// flushed and moved into place. The previous value, if any, is kept.
    pub fn commit(mut self) -> CacheResult<()> {
        let Some(out) = self.out.take() else {
            return Ok(());
        };

        if self.failed {
            drop(out);
            self.cache.complete_edit(&self.key, None)?;
            return Err(CacheError::Io(io::Error::other(
                "write failed during edit, entry aborted",
            )));
        }

        match out.into_inner() {
            Ok(staged) => self.cache.complete_edit(&self.key, Some(staged)),
            Err(e) => {
                let error = e.into_error();
                self.cache.complete_edit(&self.key, None)?;
                Err(error.into())
            }
        }
    }

    /// Discards the written bytes.
    ///
    /// # Errors
    /// Returns error if the journal cannot be written.
    pub fn abort(mut self) -> CacheResult<()> {
        self.out.take();
        self.cache.complete_edit(&self.key, None)
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<NamedTempFile>> {
        self.out
            .as_mut()
            .ok_or_else(|| io::Error::other("editor already closed"))
    }
}

impl Write for Editor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.writer()?.write(buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.writer()?.flush();
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

impl Drop for Editor<'_> {
    fn drop(&mut self) {
        if self.out.take().is_some() {
            debug!(id = %self.key, "Editor released without commit, aborting");
            if let Err(e) = self.cache.complete_edit(&self.key, None) {
                warn!(id = %self.key, error = %e, "Failed to record aborted edit");
            }
        }
    }
}

impl std::fmt::Debug for Editor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("key", &self.key)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// Readable view of a committed value.
///
/// The file is opened when the snapshot is taken, so it stays readable even
/// if the entry is evicted or replaced afterwards.
#[derive(Debug)]
pub struct Snapshot {
    key: CacheKey,
    len: u64,
    reader: BufReader<File>,
}

impl Snapshot {
    pub(super) fn new(key: CacheKey, len: u64, file: File) -> Self {
        Self {
            key,
            len,
            reader: BufReader::with_capacity(IO_BUFFER_SIZE, file),
        }
    }

    /// Key of the entry.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Length of the value in bytes, as committed.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the whole value.
    ///
    /// # Errors
    /// Returns error if the file cannot be read.
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for Snapshot {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}
