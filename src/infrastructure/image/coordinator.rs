//! Two-tier cache coordinator: memory first, disk second.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use async_trait::async_trait;
use image::ImageFormat;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{CacheKey, DecodedImage, ImageSource, LoadedImage};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageCachePort;

use super::disk_cache::{
    DEFAULT_MAX_DISK_BYTES, DISK_CACHE_SUBDIR, FORMAT_VERSION, PersistentCache, VALUE_COUNT,
};
use super::memory_cache::{CacheStats, DEFAULT_MAX_MEMORY_BYTES, MemoryImageCache};

type DiskHandle = Arc<Mutex<PersistentCache>>;

/// Initialization state of the persistent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitState {
    /// Nobody has asked for the disk tier yet.
    Uninitialized = 0,
    /// The store is being opened.
    Initializing = 1,
    /// The store is open.
    Ready = 2,
    /// Opening failed; the coordinator runs memory-only.
    Failed = 3,
}

impl InitState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for InitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Settings for a [`CacheCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Cache root; the store lives in its `employee_thumbnails` subdirectory.
    pub root_dir: PathBuf,
    /// Bound for the memory tier.
    pub max_memory_bytes: usize,
    /// Bound for the disk tier.
    pub max_disk_bytes: u64,
    /// On-disk format version.
    pub format_version: u32,
}

impl CoordinatorConfig {
    /// Creates a configuration with default bounds rooted at `root_dir`.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
            format_version: FORMAT_VERSION,
        }
    }
}

/// Snapshot of both tiers.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    /// Disk tier state.
    pub state: InitState,
    /// Memory tier statistics.
    pub memory: CacheStats,
    /// Committed disk entries, if the disk tier is open.
    pub disk_entries: Option<usize>,
    /// Committed disk bytes, if the disk tier is open.
    pub disk_size_bytes: Option<u64>,
    /// Disk bound in bytes.
    pub disk_max_bytes: u64,
}

impl std::fmt::Display for CoordinatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.memory)?;
        match (self.disk_entries, self.disk_size_bytes) {
            (Some(entries), Some(size)) => write!(
                f,
                "Disk: {entries} entries, {size}/{} bytes ({})",
                self.disk_max_bytes, self.state
            ),
            _ => write!(f, "Disk: unavailable ({})", self.state),
        }
    }
}

type Flight = Arc<OnceCell<Option<DecodedImage>>>;

/// Invalidation token observed for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    epoch: u64,
    removals: u64,
}

/// Tracks `clear_all` calls globally and `remove` calls per key, so that a
/// disk write or promotion is dropped only when its own key was invalidated.
#[derive(Debug, Default)]
struct Invalidations {
    epoch: u64,
    removals: HashMap<CacheKey, u64>,
}

impl Invalidations {
    fn current(&self, key: &CacheKey) -> Generation {
        Generation {
            epoch: self.epoch,
            removals: self.removals.get(key).copied().unwrap_or(0),
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        *self.removals.entry(key.clone()).or_insert(0) += 1;
    }

    /// Tokens from older epochs never match, so per-key counts can restart.
    fn clear(&mut self) {
        self.epoch += 1;
        self.removals.clear();
    }
}

struct Shared {
    config: CoordinatorConfig,
    memory: MemoryImageCache,
    disk: OnceCell<Option<DiskHandle>>,
    state: AtomicU8,
    open_attempts: AtomicUsize,
    invalidations: Mutex<Invalidations>,
    flights: Mutex<HashMap<CacheKey, Flight>>,
    writes: Mutex<Vec<JoinHandle<()>>>,
}

/// Unifies the memory and disk tiers behind one get/put/remove/clear API.
///
/// The disk tier is opened once, lazily, by whichever caller needs it first
/// (or explicitly through [`initialize`](Self::initialize)). Callers that
/// arrive while it is opening wait for the outcome; a failed open leaves the
/// coordinator serving from memory only. Disk I/O runs on the blocking
/// thread pool.
///
/// Cloning yields another handle on the same caches.
#[derive(Clone)]
pub struct CacheCoordinator {
    shared: Arc<Shared>,
}

impl CacheCoordinator {
    /// Creates a coordinator. No I/O happens until the disk tier is needed.
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        let memory = MemoryImageCache::new(config.max_memory_bytes);
        Self {
            shared: Arc::new(Shared {
                config,
                memory,
                disk: OnceCell::new(),
                state: AtomicU8::new(InitState::Uninitialized as u8),
                open_attempts: AtomicUsize::new(0),
                invalidations: Mutex::new(Invalidations::default()),
                flights: Mutex::new(HashMap::new()),
                writes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Opens the disk tier under `root_dir` if nobody has yet.
    ///
    /// Safe to call concurrently and repeatedly: the first caller opens the
    /// store, everyone else waits for that attempt to resolve. Failures are
    /// logged and leave the coordinator memory-only. A different `root_dir`
    /// on a later call is ignored.
    pub async fn initialize(&self, root_dir: &Path) {
        self.disk_tier_at(root_dir).await;
        if root_dir != self.shared.config.root_dir && self.state() == InitState::Ready {
            debug!(
                requested = %root_dir.display(),
                "Disk cache already initialized, ignoring root"
            );
        }
    }

    /// Current disk tier state.
    #[must_use]
    pub fn state(&self) -> InitState {
        InitState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Number of times opening the disk tier was attempted.
    #[must_use]
    pub fn disk_open_attempts(&self) -> usize {
        self.shared.open_attempts.load(Ordering::Acquire)
    }

    /// The memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryImageCache {
        &self.shared.memory
    }

    async fn disk_tier(&self) -> Option<DiskHandle> {
        let root = self.shared.config.root_dir.clone();
        self.disk_tier_at(&root).await
    }

    async fn disk_tier_at(&self, root: &Path) -> Option<DiskHandle> {
        self.shared
            .disk
            .get_or_init(|| self.open_disk(root.join(DISK_CACHE_SUBDIR)))
            .await
            .clone()
    }

    async fn open_disk(&self, dir: PathBuf) -> Option<DiskHandle> {
        self.shared
            .state
            .store(InitState::Initializing as u8, Ordering::Release);
        self.shared.open_attempts.fetch_add(1, Ordering::AcqRel);

        let format_version = self.shared.config.format_version;
        let max_bytes = self.shared.config.max_disk_bytes;
        let path = dir.clone();
        let opened = tokio::task::spawn_blocking(move || {
            PersistentCache::open(path, format_version, VALUE_COUNT, max_bytes)
        })
        .await;

        let (state, handle) = match opened {
            Ok(Ok(cache)) => {
                info!(
                    dir = %dir.display(),
                    entries = cache.len(),
                    size = cache.size_bytes(),
                    "Disk cache ready"
                );
                (InitState::Ready, Some(Arc::new(Mutex::new(cache))))
            }
            Ok(Err(e)) => {
                error!(error = %e, "Disk cache unavailable, continuing with memory cache only");
                (InitState::Failed, None)
            }
            Err(e) => {
                error!(error = %e, "Disk cache open task panicked");
                (InitState::Failed, None)
            }
        };
        self.shared.state.store(state as u8, Ordering::Release);
        handle
    }

    /// Looks an image up in memory, then on disk.
    ///
    /// A disk hit is decoded and promoted into memory before returning.
    /// Concurrent lookups of the same key share one disk read.
    pub async fn lookup(&self, key: &CacheKey) -> Option<LoadedImage> {
        if let Some(image) = self.shared.memory.get(key) {
            return Some(LoadedImage {
                key: key.clone(),
                image,
                source: ImageSource::MemoryCache,
            });
        }

        let disk = self.disk_tier().await?;

        let flight = {
            let mut flights = self.shared.flights.lock();
            Arc::clone(flights.entry(key.clone()).or_default())
        };
        let image = flight
            .get_or_init(|| self.read_through(key, disk))
            .await
            .clone();
        {
            let mut flights = self.shared.flights.lock();
            if flights.get(key).is_some_and(|f| Arc::ptr_eq(f, &flight)) {
                flights.remove(key);
            }
        }

        image.map(|image| LoadedImage {
            key: key.clone(),
            image,
            source: ImageSource::DiskCache,
        })
    }

    /// Gets an image from either tier.
    pub async fn get(&self, key: &CacheKey) -> Option<DecodedImage> {
        self.lookup(key).await.map(|loaded| loaded.image)
    }

    async fn read_through(&self, key: &CacheKey, disk: DiskHandle) -> Option<DecodedImage> {
        if let Some(image) = self.shared.memory.peek(key) {
            return Some(image);
        }
        let generation = self.generation(key);

        let read_key = key.clone();
        let read = tokio::task::spawn_blocking(move || -> CacheResult<Option<Vec<u8>>> {
            let snapshot = disk.lock().get(&read_key)?;
            snapshot
                .map(|s| s.read_all().map_err(CacheError::from))
                .transpose()
        })
        .await;

        let bytes = match read {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                trace!(id = %key, "Disk cache miss");
                return None;
            }
            Ok(Err(e)) => {
                warn!(id = %key, error = %e, "Disk cache read failed");
                return None;
            }
            Err(e) => {
                error!(id = %key, error = %e, "Disk read task panicked");
                return None;
            }
        };

        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await;
        let image = match decoded {
            Ok(Ok(img)) => DecodedImage::new(img),
            Ok(Err(e)) => {
                warn!(id = %key, error = %e, "Failed to decode cached image");
                return None;
            }
            Err(e) => {
                error!(id = %key, error = %e, "Decode task panicked");
                return None;
            }
        };
        debug!(id = %key, "Decoded image from disk cache");

        if self.generation(key) != generation {
            return Some(image);
        }
        if !self.shared.memory.insert_if_absent(key.clone(), image.clone())
            && let Some(newer) = self.shared.memory.peek(key)
        {
            return Some(newer);
        }
        Some(image)
    }

    /// Stores an image in memory now and on disk in the background.
    ///
    /// Disk persistence is best effort: failures are logged, and a `remove`
    /// of the same key or a `clear_all` issued before the write lands
    /// cancels it. Use
    /// [`persist`](Self::persist) to wait for the disk write.
    pub fn put(&self, key: CacheKey, image: DecodedImage) {
        self.shared.memory.put(key.clone(), image.clone());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(id = %key, "No async runtime, skipping disk cache write");
            return;
        };
        let generation = self.generation(&key);
        let this = self.clone();
        let write = runtime.spawn(async move {
            if let Err(e) = this.persist_since(generation, &key, &image).await {
                warn!(id = %key, error = %e, "Failed to cache to disk");
            }
        });

        let mut writes = self.shared.writes.lock();
        writes.retain(|w| !w.is_finished());
        writes.push(write);
    }

    /// Writes an image to the disk tier and waits for the commit.
    ///
    /// # Errors
    /// Returns error if the disk tier is unavailable, the image cannot be
    /// encoded, or the write fails. A failed write never replaces the
    /// previous value.
    pub async fn persist(&self, key: &CacheKey, image: &DecodedImage) -> CacheResult<()> {
        let generation = self.generation(key);
        self.persist_since(generation, key, image).await
    }

    fn generation(&self, key: &CacheKey) -> Generation {
        self.shared.invalidations.lock().current(key)
    }

    /// Writes an image unless `remove` of the same key or `clear_all` ran
    /// after `generation` was observed.
    async fn persist_since(
        &self,
        generation: Generation,
        key: &CacheKey,
        image: &DecodedImage,
    ) -> CacheResult<()> {
        let disk = self.disk_tier().await.ok_or(CacheError::Unavailable)?;

        let shared = Arc::clone(&self.shared);
        let key = key.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || {
            let encoded = encode_png(&image)?;
            let mut cache = disk.lock();
            if shared.invalidations.lock().current(&key) != generation {
                debug!(id = %key, "Cache invalidated since put, dropping disk write");
                return Ok(());
            }
            let mut editor = cache.edit(&key)?;
            editor.write_all(&encoded)?;
            editor.commit()
        })
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
    }

    /// Removes an image from both tiers.
    pub async fn remove(&self, key: &CacheKey) {
        self.shared.invalidations.lock().remove(key);
        self.shared.memory.remove(key);

        let Some(disk) = self.disk_tier().await else {
            return;
        };
        let key = key.clone();
        let removed = tokio::task::spawn_blocking(move || disk.lock().remove(&key)).await;
        match removed {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to remove image from disk cache"),
            Err(e) => error!(error = %e, "Disk remove task panicked"),
        }
    }

    /// Clears both tiers.
    pub async fn clear_all(&self) {
        self.shared.invalidations.lock().clear();
        self.shared.memory.evict_all();

        if let Some(disk) = self.disk_tier().await {
            let cleared = tokio::task::spawn_blocking(move || disk.lock().delete_all()).await;
            match cleared {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to clear disk cache"),
                Err(e) => error!(error = %e, "Disk clear task panicked"),
            }
        }
        info!("Cleared all image caches");
    }

    /// Waits for background disk writes, then flushes pending journal
    /// records. Call at session end.
    pub async fn flush(&self) {
        let writes = std::mem::take(&mut *self.shared.writes.lock());
        for write in writes {
            if let Err(e) = write.await {
                error!(error = %e, "Disk write task panicked");
            }
        }

        let Some(Some(disk)) = self.shared.disk.get().cloned() else {
            return;
        };
        let flushed = tokio::task::spawn_blocking(move || disk.lock().flush()).await;
        if let Ok(Err(e)) = flushed {
            warn!(error = %e, "Failed to flush disk cache journal");
        }
    }

    /// Returns statistics for both tiers, opening the disk tier if needed.
    pub async fn stats(&self) -> CoordinatorStats {
        let disk = match self.disk_tier().await {
            Some(disk) => tokio::task::spawn_blocking(move || {
                let cache = disk.lock();
                (cache.len(), cache.size_bytes())
            })
            .await
            .ok(),
            None => None,
        };
        CoordinatorStats {
            state: self.state(),
            memory: self.shared.memory.stats(),
            disk_entries: disk.map(|(entries, _)| entries),
            disk_size_bytes: disk.map(|(_, size)| size),
            disk_max_bytes: self.shared.config.max_disk_bytes,
        }
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ImageCachePort for CacheCoordinator {
    async fn lookup(&self, key: &CacheKey) -> Option<LoadedImage> {
        Self::lookup(self, key).await
    }

    fn put(&self, key: CacheKey, image: DecodedImage) {
        Self::put(self, key, image);
    }

    async fn remove(&self, key: &CacheKey) {
        Self::remove(self, key).await;
    }

    async fn clear_all(&self) {
        Self::clear_all(self).await;
    }
}

/// Encodes an image losslessly for the disk tier.
fn encode_png(image: &DecodedImage) -> CacheResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::with_capacity(image.size_bytes() / 2));
    image
        .as_dynamic()
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| CacheError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::DynamicImage;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> DecodedImage {
        #[allow(clippy::cast_possible_truncation)]
        let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 7]));
        DecodedImage::new(DynamicImage::ImageRgb8(img))
    }

    fn coordinator(root: &Path) -> CacheCoordinator {
        CacheCoordinator::new(CoordinatorConfig::new(root))
    }

    /// A root under which the store directory cannot be created.
    fn broken_root(temp: &TempDir) -> PathBuf {
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        blocker
    }

    #[tokio::test]
    async fn test_put_then_get_from_memory() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");
        let img = gradient(8, 8);

        cache.put(key.clone(), img.clone());
        let loaded = cache.lookup(&key).await.unwrap();

        assert_eq!(loaded.source, ImageSource::MemoryCache);
        assert_eq!(loaded.image, img);
    }

    #[tokio::test]
    async fn test_disk_hit_is_promoted_to_memory() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");
        let img = gradient(16, 12);

        cache.persist(&key, &img).await.unwrap();
        assert!(cache.memory().is_empty());

        let first = cache.lookup(&key).await.unwrap();
        assert_eq!(first.source, ImageSource::DiskCache);
        assert_eq!(first.image, img);

        let second = cache.lookup(&key).await.unwrap();
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert!(second.image.shares_buffer(&first.image));
    }

    #[tokio::test]
    async fn test_entries_survive_new_session() {
        let temp = TempDir::new().unwrap();
        let key = CacheKey::derive("https://example.com/a.png");
        let img = gradient(10, 10);
        {
            let cache = coordinator(temp.path());
            cache.persist(&key, &img).await.unwrap();
            cache.flush().await;
        }

        let cache = coordinator(temp.path());
        assert_eq!(cache.get(&key).await, Some(img));
    }

    #[tokio::test]
    async fn test_background_put_reaches_disk() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");

        cache.put(key.clone(), gradient(4, 4));
        cache.flush().await;

        assert_eq!(cache.stats().await.disk_entries, Some(1));
        let reopened = coordinator(temp.path());
        assert_eq!(reopened.get(&key).await, Some(gradient(4, 4)));
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_tiers() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");
        let img = gradient(4, 4);

        cache.persist(&key, &img).await.unwrap();
        cache.put(key.clone(), img);
        cache.clear_all().await;

        // Let the background write from `put` run; it must not resurrect the entry.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().await.disk_entries, Some(0));
    }

    #[tokio::test]
    async fn test_remove_drops_both_tiers() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");
        let img = gradient(4, 4);

        cache.persist(&key, &img).await.unwrap();
        cache.memory().put(key.clone(), img);
        cache.remove(&key).await;

        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_cancels_pending_put_of_same_key() {
        let temp = TempDir::new().unwrap();
        let key = CacheKey::derive("https://example.com/a.png");
        {
            let cache = coordinator(temp.path());
            cache.put(key.clone(), gradient(4, 4));
            cache.remove(&key).await;
            cache.flush().await;
        }

        let reopened = coordinator(temp.path());
        assert!(reopened.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_leaves_other_pending_puts_alone() {
        let temp = TempDir::new().unwrap();
        let kept = CacheKey::derive("https://example.com/kept.png");
        let removed = CacheKey::derive("https://example.com/removed.png");
        {
            let cache = coordinator(temp.path());
            cache.put(kept.clone(), gradient(4, 4));
            cache.remove(&removed).await;
            cache.flush().await;
        }

        let reopened = coordinator(temp.path());
        let loaded = reopened.lookup(&kept).await.unwrap();
        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!(loaded.image, gradient(4, 4));
    }

    #[tokio::test]
    async fn test_remove_only_invalidates_its_own_key() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");

        let token = cache.generation(&key);
        cache.remove(&CacheKey::derive("https://example.com/b.png")).await;
        assert_eq!(cache.generation(&key), token);

        cache.remove(&key).await;
        assert_ne!(cache.generation(&key), token);
    }

    #[test]
    fn test_clear_invalidates_every_key() {
        let mut invalidations = Invalidations::default();
        let a = CacheKey::derive("a");
        invalidations.remove(&a);
        let before = invalidations.current(&a);

        invalidations.clear();

        assert_ne!(invalidations.current(&a), before);
        assert_ne!(
            invalidations.current(&CacheKey::derive("b")),
            Generation {
                epoch: 0,
                removals: 0
            }
        );
    }

    #[tokio::test]
    async fn test_open_failure_degrades_to_memory_only() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(&broken_root(&temp));
        let key = CacheKey::derive("https://example.com/a.png");
        let img = gradient(4, 4);

        cache.initialize(&broken_root(&temp)).await;
        assert_eq!(cache.state(), InitState::Failed);

        cache.put(key.clone(), img.clone());
        assert_eq!(cache.get(&key).await, Some(img.clone()));
        assert!(matches!(
            cache.persist(&key, &img).await,
            Err(CacheError::Unavailable)
        ));
        assert!(cache.get(&CacheKey::derive("other")).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.disk_entries, None);
        assert_eq!(cache.disk_open_attempts(), 1);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        assert_eq!(cache.state(), InitState::Uninitialized);

        cache.initialize(temp.path()).await;
        assert_eq!(cache.state(), InitState::Ready);

        cache.initialize(temp.path()).await;
        assert_eq!(cache.disk_open_attempts(), 1);
    }

    async fn race_initialize_and_get(root: PathBuf, expected: InitState) {
        let cache = coordinator(&root);
        let key = CacheKey::derive("https://example.com/missing.png");

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                let root = root.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        cache.initialize(&root).await;
                        None
                    } else {
                        cache.get(&key).await
                    }
                })
            })
            .collect();

        for task in tasks {
            let result = tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .expect("caller blocked on initialization")
                .unwrap();
            assert!(result.is_none());
        }
        assert_eq!(cache.disk_open_attempts(), 1);
        assert_eq!(cache.state(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_opens_once() {
        let temp = TempDir::new().unwrap();
        race_initialize_and_get(temp.path().to_path_buf(), InitState::Ready).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_failure_releases_waiters() {
        let temp = TempDir::new().unwrap();
        race_initialize_and_get(broken_root(&temp), InitState::Failed).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disk_reads_share_one_promotion() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");
        let img = gradient(32, 32);
        cache.persist(&key, &img).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.get(&key).await })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }
        let promoted = cache.memory().peek(&key).unwrap();
        for image in &results {
            assert_eq!(*image, img);
            assert!(image.shares_buffer(&promoted));
        }
        assert_eq!(cache.memory().len(), 1);
    }

    #[tokio::test]
    async fn test_promotion_never_replaces_newer_value() {
        let temp = TempDir::new().unwrap();
        let cache = coordinator(temp.path());
        let key = CacheKey::derive("https://example.com/a.png");
        let old = gradient(4, 4);
        let newer = gradient(6, 6);

        cache.persist(&key, &old).await.unwrap();
        cache.memory().put(key.clone(), newer.clone());
        let disk = cache.disk_tier().await.unwrap();

        let image = cache.read_through(&key, disk).await.unwrap();
        assert!(image.shares_buffer(&newer));
    }

    #[test]
    fn test_encode_png_is_lossless() {
        let img = gradient(5, 3);
        let bytes = encode_png(&img).unwrap();
        let decoded = DecodedImage::new(image::load_from_memory(&bytes).unwrap());
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_stats_display() {
        let stats = CoordinatorStats {
            state: InitState::Failed,
            memory: MemoryImageCache::new(10).stats(),
            disk_entries: None,
            disk_size_bytes: None,
            disk_max_bytes: 10,
        };
        assert!(stats.to_string().contains("Disk: unavailable (failed)"));
    }
}
