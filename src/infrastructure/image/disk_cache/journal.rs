//! Append-only journal describing the persistent cache contents.
//!
//! The journal starts with a five line header followed by one record per
//! line:
//!
//! ```text
//! thumbcache.journal
//! 1
//! <format version>
//! <value count>
//!
//! DIRTY 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! CLEAN 3400330d1dfc7f3f7f4b8d4d803dfcf6 8312
//! READ 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! REMOVE 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! ```
//!
//! `DIRTY` marks an edit in progress and must be followed by `CLEAN` (the
//! value was committed, with its length) or `REMOVE`. `READ` only records
//! access order.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use lru::LruCache;
use tracing::warn;

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Journal file name inside the cache directory.
pub const JOURNAL_FILE: &str = "journal";

const MAGIC: &str = "thumbcache.journal";
const LAYOUT_VERSION: &str = "1";

const DIRTY: &str = "DIRTY";
const CLEAN: &str = "CLEAN";
const REMOVE: &str = "REMOVE";
const READ: &str = "READ";

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Dirty(CacheKey),
    Clean(CacheKey, u64),
    Remove(CacheKey),
    Read(CacheKey),
}

impl Record {
    fn parse(line: &str) -> CacheResult<Self> {
        let mut parts = line.split(' ');
        let op = parts.next().unwrap_or_default();
        let key = parts
            .next()
            .and_then(CacheKey::from_encoded)
            .ok_or_else(|| CacheError::corrupt(format!("bad key in line {line:?}")))?;

        let record = match op {
            DIRTY => Self::Dirty(key),
            REMOVE => Self::Remove(key),
            READ => Self::Read(key),
            CLEAN => {
                let len = parts
                    .next()
                    .and_then(|l| l.parse::<u64>().ok())
                    .ok_or_else(|| CacheError::corrupt(format!("bad length in line {line:?}")))?;
                Self::Clean(key, len)
            }
            _ => return Err(CacheError::corrupt(format!("unknown record {line:?}"))),
        };

        if parts.next().is_some() {
            return Err(CacheError::corrupt(format!("trailing data in line {line:?}")));
        }
        Ok(record)
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dirty(key) => write!(f, "{DIRTY} {key}"),
            Self::Clean(key, len) => write!(f, "{CLEAN} {key} {len}"),
            Self::Remove(key) => write!(f, "{REMOVE} {key}"),
            Self::Read(key) => write!(f, "{READ} {key}"),
        }
    }
}

/// Parameters recorded in the journal header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub format_version: u32,
    pub value_count: usize,
}

impl Header {
    fn write_to(self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "{MAGIC}")?;
        writeln!(out, "{LAYOUT_VERSION}")?;
        writeln!(out, "{}", self.format_version)?;
        writeln!(out, "{}", self.value_count)?;
        writeln!(out)
    }
}

/// Result of replaying a journal.
#[derive(Debug)]
pub enum Replay {
    /// The journal was written with another format version or value count.
    Stale,
    /// Readable entries in access order, plus bookkeeping.
    Entries {
        /// Committed entries and their value lengths, in access order.
        entries: LruCache<CacheKey, u64>,
        /// Keys that were being edited when the journal was last written.
        orphans: Vec<CacheKey>,
        /// Records that no longer describe a live entry.
        redundant: usize,
        /// The last line was torn and the journal should be rewritten.
        needs_rebuild: bool,
    },
}

/// Reads and replays the journal at `path`.
pub fn replay(path: &Path, expected: Header) -> CacheResult<Replay> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = Vec::with_capacity(5);
    for _ in 0..5 {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(CacheError::corrupt("truncated header"));
        }
        header.push(line.trim_end_matches('\n').to_string());
    }
    if header[0] != MAGIC || header[1] != LAYOUT_VERSION || !header[4].is_empty() {
        return Err(CacheError::corrupt(format!("unexpected header {header:?}")));
    }
    let stale = header[2] != expected.format_version.to_string()
        || header[3] != expected.value_count.to_string();
    if stale {
        return Ok(Replay::Stale);
    }

    let mut entries: LruCache<CacheKey, u64> = LruCache::unbounded();
    let mut dirty: Vec<CacheKey> = Vec::new();
    let mut line_count = 0usize;
    let mut needs_rebuild = false;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let complete = line.ends_with('\n');
        let record = match Record::parse(line.trim_end_matches('\n')) {
            Ok(record) => record,
            Err(e) if !complete => {
                warn!(error = %e, "Ignoring torn final journal line");
                needs_rebuild = true;
                break;
            }
            Err(e) => return Err(e),
        };
        line_count += 1;

        match record {
            Record::Dirty(key) => {
                if !dirty.contains(&key) {
                    dirty.push(key);
                }
            }
            Record::Clean(key, len) => {
                dirty.retain(|k| *k != key);
                entries.put(key, len);
            }
            Record::Remove(key) => {
                dirty.retain(|k| *k != key);
                entries.pop(&key);
            }
            Record::Read(key) => {
                let _ = entries.get(&key);
            }
        }
    }

    // An edit that never completed leaves no readable value behind.
    for key in &dirty {
        entries.pop(key);
    }

    let redundant = line_count.saturating_sub(entries.len());
    Ok(Replay::Entries {
        entries,
        orphans: dirty,
        redundant,
        needs_rebuild,
    })
}

/// Atomically replaces the journal with a compact one describing `entries`.
///
/// `entries` must yield least recently used first.
pub fn rewrite<'a>(
    dir: &Path,
    header: Header,
    entries: impl Iterator<Item = (&'a CacheKey, &'a u64)>,
) -> CacheResult<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix("journal.")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        header.write_to(&mut out)?;
        for (key, len) in entries {
            writeln!(out, "{}", Record::Clean(key.clone(), *len))?;
        }
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(JOURNAL_FILE)).map_err(|e| e.error)?;
    Ok(())
}

/// Appending handle on the live journal.
#[derive(Debug)]
pub struct JournalWriter {
    out: BufWriter<File>,
}

impl JournalWriter {
    /// Opens the journal in `dir` for appending.
    pub fn open(dir: &Path) -> CacheResult<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(dir.join(JOURNAL_FILE))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Appends a record. `DIRTY` records are flushed immediately so a crash
    /// mid-edit is detectable on the next open.
    pub fn append(&mut self, record: &Record) -> CacheResult<()> {
        writeln!(self.out, "{record}")?;
        if matches!(record, Record::Dirty(_)) {
            self.out.flush()?;
        }
        Ok(())
    }

    /// Flushes buffered records.
    pub fn flush(&mut self) -> CacheResult<()> {
        self.out.flush()?;
        Ok(())
    }
}
