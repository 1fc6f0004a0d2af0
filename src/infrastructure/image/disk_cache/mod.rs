//! Persistent, size-bounded cache for encoded images.
//!
//! Values live in one file per key next to an append-only journal (see
//! [`journal`]) recording commits, removals and reads. Writes go through an
//! [`Editor`], which stages bytes in a temporary file and either renames it
//! into place on commit or deletes it on abort, so a reader never sees a
//! partially written value.

mod editor;
mod journal;

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

pub use editor::{Editor, Snapshot};
use journal::{Header, JOURNAL_FILE, JournalWriter, Record, Replay};

/// Maximum disk cache size in bytes (10 MB default).
pub const DEFAULT_MAX_DISK_BYTES: u64 = 10 * 1024 * 1024;

/// Subdirectory of the cache root holding the store.
pub const DISK_CACHE_SUBDIR: &str = "employee_thumbnails";

/// Current on-disk format version. Bump on incompatible layout changes;
/// stores written with another version are discarded on open.
pub const FORMAT_VERSION: u32 = 1;

/// Values stored per key. Only one slot is supported.
pub const VALUE_COUNT: usize = 1;

/// Redundant journal records tolerated before the journal is compacted.
const REBUILD_THRESHOLD: usize = 2000;

/// Journaled on-disk LRU store.
///
/// Not internally synchronized: callers share one instance behind a mutex.
/// Every method performs blocking file I/O.
pub struct PersistentCache {
    dir: PathBuf,
    header: Header,
    max_bytes: u64,
    entries: LruCache<CacheKey, u64>,
    size_bytes: u64,
    journal: JournalWriter,
    redundant_ops: usize,
}

impl PersistentCache {
    /// Opens (or creates) the store in `dir`.
    ///
    /// A store written with a different `format_version` or `value_count` is
    /// discarded and recreated. Entries over `max_bytes` are trimmed.
    ///
    /// # Errors
    /// Returns [`CacheError::Init`] if the directory cannot be created or
    /// written, or if the journal is corrupt.
    pub fn open(
        dir: impl Into<PathBuf>,
        format_version: u32,
        value_count: usize,
        max_bytes: u64,
    ) -> CacheResult<Self> {
        let dir = dir.into();
        if value_count != VALUE_COUNT {
            return Err(CacheError::init(
                &dir,
                format!("unsupported value count {value_count}"),
            ));
        }

        let header = Header {
            format_version,
            value_count,
        };
        Self::open_in(dir.clone(), header, max_bytes).map_err(|e| match e {
            CacheError::Init { .. } => e,
            other => CacheError::init(&dir, other),
        })
    }

    fn open_in(dir: PathBuf, header: Header, max_bytes: u64) -> CacheResult<Self> {
        fs::create_dir_all(&dir)?;

        let journal_path = dir.join(JOURNAL_FILE);
        let replayed = if journal_path.exists() {
            journal::replay(&journal_path, header)?
        } else {
            Replay::Stale
        };

        let (entries, redundant_ops) = match replayed {
            Replay::Stale => {
                if journal_path.exists() {
                    info!(dir = %dir.display(), "Disk cache format changed, discarding old entries");
                }
                let entries = LruCache::unbounded();
                sweep(&dir, &entries);
                journal::rewrite(&dir, header, std::iter::empty())?;
                (entries, 0)
            }
            Replay::Entries {
                entries,
                orphans,
                redundant,
                needs_rebuild,
            } => {
                if !orphans.is_empty() {
                    debug!(count = orphans.len(), "Discarding unfinished disk cache edits");
                }
                sweep(&dir, &entries);
                if needs_rebuild || !orphans.is_empty() {
                    journal::rewrite(&dir, header, entries.iter().rev())?;
                    (entries, 0)
                } else {
                    (entries, redundant)
                }
            }
        };

        let size_bytes = entries.iter().map(|(_, len)| *len).sum();
        let journal = JournalWriter::open(&dir)?;

        let mut cache = Self {
            dir,
            header,
            max_bytes,
            entries,
            size_bytes,
            journal,
            redundant_ops,
        };
        cache.trim_to_size()?;
        cache.journal.flush()?;

        debug!(
            dir = %cache.dir.display(),
            entries = cache.entries.len(),
            size = cache.size_bytes,
            "Opened disk cache"
        );
        Ok(cache)
    }

    /// Returns a readable snapshot of the value for `key` and marks it most
    /// recently used.
    ///
    /// # Errors
    /// Returns error if the value file exists but cannot be opened or the
    /// journal cannot be written.
    pub fn get(&mut self, key: &CacheKey) -> CacheResult<Option<Snapshot>> {
        let Some(&len) = self.entries.get(key) else {
            return Ok(None);
        };

        match File::open(self.value_path(key)) {
            Ok(file) => {
                self.journal.append(&Record::Read(key.clone()))?;
                self.redundant_ops += 1;
                self.rebuild_if_needed()?;
                Ok(Some(Snapshot::new(key.clone(), len, file)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(id = %key, "Disk cache value missing, dropping entry");
                self.entries.pop(key);
                self.size_bytes -= len;
                self.journal.append(&Record::Remove(key.clone()))?;
                self.redundant_ops += 1;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Starts an edit of the value for `key`.
    ///
    /// The returned editor must be committed or aborted; dropping it aborts.
    /// While it lives it holds the only handle on the cache.
    ///
    /// # Errors
    /// Returns error if the staging file cannot be created or the journal
    /// cannot be written.
    pub fn edit(&mut self, key: &CacheKey) -> CacheResult<Editor<'_>> {
        let staging = tempfile::Builder::new()
            .prefix(&format!("{key}."))
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        self.journal.append(&Record::Dirty(key.clone()))?;
        Ok(Editor::new(self, key.clone(), staging))
    }

    /// Finishes an edit: installs `staged` as the new value, or keeps the
    /// previous value (if any) when `staged` is `None`.
    fn complete_edit(&mut self, key: &CacheKey, staged: Option<NamedTempFile>) -> CacheResult<()> {
        let installed = staged.map(|tmp| self.install(key, tmp)).transpose();

        let record = match (&installed, self.entries.peek(key)) {
            (Ok(Some(len)), _) => Record::Clean(key.clone(), *len),
            (_, Some(len)) => Record::Clean(key.clone(), *len),
            (_, None) => Record::Remove(key.clone()),
        };
        self.journal.append(&record)?;
        self.redundant_ops += 1;

        self.trim_to_size()?;
        self.journal.flush()?;
        self.rebuild_if_needed()?;

        installed.map(|len| {
            if let Some(len) = len {
                debug!(id = %key, size = len, "Committed disk cache entry");
            }
        })
    }

    fn install(&mut self, key: &CacheKey, staged: NamedTempFile) -> CacheResult<u64> {
        staged.as_file().sync_all()?;
        let len = staged.as_file().metadata()?.len();
        if len > self.max_bytes {
            warn!(id = %key, size = len, max = self.max_bytes, "Value exceeds disk cache bound");
            return Err(CacheError::EntryTooLarge {
                size: len,
                max: self.max_bytes,
            });
        }
        staged
            .persist(self.value_path(key))
            .map_err(|e| e.error)?;

        if let Some(old) = self.entries.put(key.clone(), len) {
            self.size_bytes -= old;
        }
        self.size_bytes += len;
        Ok(len)
    }

    /// Removes the entry for `key`. Returns whether one existed.
    ///
    /// # Errors
    /// Returns error if the value file cannot be deleted.
    pub fn remove(&mut self, key: &CacheKey) -> CacheResult<bool> {
        let Some(&len) = self.entries.peek(key) else {
            return Ok(false);
        };

        match fs::remove_file(self.value_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.entries.pop(key);
        self.size_bytes -= len;
        self.journal.append(&Record::Remove(key.clone()))?;
        self.redundant_ops += 1;
        self.journal.flush()?;
        self.rebuild_if_needed()?;
        debug!(id = %key, "Removed disk cache entry");
        Ok(true)
    }

    /// Deletes every entry. The store stays open and usable.
    ///
    /// # Errors
    /// Returns error if the journal cannot be rewritten.
    pub fn delete_all(&mut self) -> CacheResult<()> {
        self.journal.flush()?;
        for (key, _) in &self.entries {
            let path = self.value_path(key);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
        self.entries.clear();
        self.size_bytes = 0;

        journal::rewrite(&self.dir, self.header, std::iter::empty())?;
        self.journal = JournalWriter::open(&self.dir)?;
        self.redundant_ops = 0;
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Returns true if a committed value exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Total bytes of committed values.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Configured bound in bytes.
    #[must_use]
    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Number of committed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Directory holding the store.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Writes buffered journal records to disk.
    ///
    /// # Errors
    /// Returns error if the journal cannot be written.
    pub fn flush(&mut self) -> CacheResult<()> {
        self.journal.flush()
    }

    fn value_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.0"))
    }

    fn trim_to_size(&mut self) -> CacheResult<()> {
        while self.size_bytes > self.max_bytes {
            let Some((key, len)) = self.entries.pop_lru() else {
                break;
            };
            let path = self.value_path(&key);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            }
            self.size_bytes -= len;
            self.journal.append(&Record::Remove(key.clone()))?;
            self.redundant_ops += 1;
            debug!(id = %key, size = len, "Evicted from disk cache");
        }
        Ok(())
    }

    fn rebuild_if_needed(&mut self) -> CacheResult<()> {
        if self.redundant_ops < REBUILD_THRESHOLD || self.redundant_ops < self.entries.len() {
            return Ok(());
        }
        self.journal.flush()?;
        journal::rewrite(&self.dir, self.header, self.entries.iter().rev())?;
        self.journal = JournalWriter::open(&self.dir)?;
        debug!(
            dropped = self.redundant_ops,
            entries = self.entries.len(),
            "Compacted disk cache journal"
        );
        self.redundant_ops = 0;
        Ok(())
    }
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("dir", &self.dir)
            .field("entries", &self.entries.len())
            .field("size_bytes", &self.size_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

/// Deletes every file in `dir` that is neither the journal nor the value of
/// a live entry: staging files of interrupted edits, values whose commit was
/// never journaled, and values of discarded entries.
fn sweep(dir: &Path, live: &LruCache<CacheKey, u64>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == JOURNAL_FILE {
            continue;
        }
        let is_live = name
            .strip_suffix(".0")
            .and_then(CacheKey::from_encoded)
            .is_some_and(|key| live.contains(&key));
        if is_live || !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        if let Err(e) = fs::remove_file(entry.path()) {
            warn!(path = %entry.path().display(), error = %e, "Failed to remove stray cache file");
        }
    }
}
