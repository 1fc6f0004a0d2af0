//! Background image loading for display slots.
//!
//! A slot is a place an image is shown in (a list row, a cell). Each slot
//! has at most one load in flight: requesting a new image for a slot aborts
//! the previous load, and a superseded or cancelled load never reports a
//! result.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::application::use_cases::FetchImageUseCase;
use crate::domain::entities::{ImageStatus, LoadedImage};
use crate::domain::errors::FetchError;

/// Identifies a display slot.
pub type SlotId = usize;

/// Message sent when a slot's image finishes loading.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// The slot the image was requested for.
    pub slot: SlotId,
    /// Requested URL.
    pub url: String,
    /// The loaded image, or why it failed.
    pub result: Result<LoadedImage, FetchError>,
}

/// Configuration for the image loader.
#[derive(Debug, Clone)]
pub struct ImageLoaderConfig {
    /// Maximum concurrent fetches.
    pub max_concurrent_downloads: usize,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
        }
    }
}

#[derive(Debug)]
enum LoaderCommand {
    Load {
        slot: SlotId,
        request: u64,
        url: String,
        max_width: u32,
        max_height: u32,
    },
    Cancel {
        slot: SlotId,
    },
    CancelAll,
}

#[derive(Debug)]
struct SlotState {
    request: u64,
    status: ImageStatus,
}

type SlotTable = Arc<Mutex<HashMap<SlotId, SlotState>>>;

/// Schedules fetches per slot and reports results over a channel.
pub struct ImageLoader {
    slots: SlotTable,
    next_request: AtomicU64,
    request_tx: mpsc::UnboundedSender<LoaderCommand>,
    config: ImageLoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// State for the background worker loop.
struct WorkerState {
    fetcher: FetchImageUseCase,
    slots: SlotTable,
    tasks: HashMap<SlotId, JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<ImageLoadedEvent>,
    semaphore: Arc<Semaphore>,
    request_rx: mpsc::UnboundedReceiver<LoaderCommand>,
}

impl ImageLoader {
    /// Creates a loader and starts its worker on the current runtime.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        fetcher: FetchImageUseCase,
        config: ImageLoaderConfig,
        event_tx: &mpsc::UnboundedSender<ImageLoadedEvent>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let slots: SlotTable = Arc::new(Mutex::new(HashMap::new()));

        let worker_state = WorkerState {
            fetcher,
            slots: slots.clone(),
            tasks: HashMap::new(),
            event_tx: event_tx.clone(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            request_rx,
        };
        tokio::spawn(Self::run_worker_loop(worker_state));

        Self {
            slots,
            next_request: AtomicU64::new(1),
            request_tx,
            config,
        }
    }

    async fn run_worker_loop(mut state: WorkerState) {
        while let Some(cmd) = state.request_rx.recv().await {
            match cmd {
                LoaderCommand::Load {
                    slot,
                    request,
                    url,
                    max_width,
                    max_height,
                } => {
                    if let Some(previous) = state.tasks.remove(&slot) {
                        previous.abort();
                    }
                    let current = state.slots.lock().get(&slot).map(|s| s.request);
                    if current != Some(request) {
                        trace!(slot, request, "Load superseded before start");
                        continue;
                    }
                    let handle = tokio::spawn(Self::run_load(
                        state.fetcher.clone(),
                        state.slots.clone(),
                        state.event_tx.clone(),
                        state.semaphore.clone(),
                        LoadJob {
                            slot,
                            request,
                            url,
                            max_width,
                            max_height,
                        },
                    ));
                    state.tasks.insert(slot, handle);
                }
                LoaderCommand::Cancel { slot } => {
                    if let Some(task) = state.tasks.remove(&slot) {
                        task.abort();
                    }
                }
                LoaderCommand::CancelAll => {
                    for (_, task) in state.tasks.drain() {
                        task.abort();
                    }
                }
            }
            state.tasks.retain(|_, task| !task.is_finished());
        }
        for (_, task) in state.tasks.drain() {
            task.abort();
        }
        debug!("Image loader stopped");
    }

    async fn run_load(
        fetcher: FetchImageUseCase,
        slots: SlotTable,
        event_tx: mpsc::UnboundedSender<ImageLoadedEvent>,
        semaphore: Arc<Semaphore>,
        job: LoadJob,
    ) {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return;
        };
        let result = fetcher
            .load(&job.url, job.max_width, job.max_height)
            .await;

        let mut slots = slots.lock();
        let Some(state) = slots.get_mut(&job.slot) else {
            return;
        };
        if state.request != job.request {
            return;
        }
        state.status = match &result {
            Ok(_) => ImageStatus::Ready,
            Err(e) => ImageStatus::Failed(e.to_string()),
        };
        let event = ImageLoadedEvent {
            slot: job.slot,
            url: job.url,
            result,
        };
        if event_tx.send(event).is_err() {
            trace!(slot = job.slot, "Event receiver dropped");
        }
    }

    /// Starts loading `url` into `slot`, replacing any load in flight for
    /// that slot. The result arrives on the event channel.
    pub fn load_async(&self, slot: SlotId, url: impl Into<String>, max_width: u32, max_height: u32) {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().insert(
            slot,
            SlotState {
                request,
                status: ImageStatus::Loading,
            },
        );
        let cmd = LoaderCommand::Load {
            slot,
            request,
            url: url.into(),
            max_width,
            max_height,
        };
        if let Err(e) = self.request_tx.send(cmd) {
            error!("Failed to send load request: {}", e);
        }
    }

    /// Cancels the load for `slot`. No event is sent for it.
    pub fn cancel(&self, slot: SlotId) {
        self.slots.lock().remove(&slot);
        if let Err(e) = self.request_tx.send(LoaderCommand::Cancel { slot }) {
            error!("Failed to send cancel request: {}", e);
        }
        debug!(slot, "Cancelled image load");
    }

    /// Cancels every load.
    pub fn cancel_all(&self) {
        let count = {
            let mut slots = self.slots.lock();
            let count = slots.values().filter(|s| s.status.is_loading()).count();
            slots.clear();
            count
        };
        if let Err(e) = self.request_tx.send(LoaderCommand::CancelAll) {
            error!("Failed to send cancel all request: {}", e);
        }
        if count > 0 {
            debug!(count = count, "Cancelled all pending image loads");
        }
    }

    /// Status of the latest request for `slot`.
    #[must_use]
    pub fn status(&self, slot: SlotId) -> ImageStatus {
        self.slots
            .lock()
            .get(&slot)
            .map(|s| s.status.clone())
            .unwrap_or_default()
    }

    /// Returns true if `slot` has a load in flight.
    #[must_use]
    pub fn is_loading(&self, slot: SlotId) -> bool {
        self.status(slot).is_loading()
    }

    /// Number of slots with a load in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|s| s.status.is_loading())
            .count()
    }
}

struct LoadJob {
    slot: SlotId,
    request: u64,
    url: String,
    max_width: u32,
    max_height: u32,
}
