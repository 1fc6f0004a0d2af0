//! Port for observing fetch outcomes.

use crate::domain::entities::DecodedImage;
use crate::domain::errors::FetchError;

/// Receives the outcome of a fetch, mirroring the returned `Result`.
///
/// Exactly one method is called per fetch.
pub trait FetchListener: Send + Sync {
    /// Called with the resolved image.
    fn on_success(&self, image: &DecodedImage);

    /// Called when the fetch failed.
    fn on_error(&self, error: &FetchError);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Listener that records every callback.
    #[derive(Default)]
    pub struct RecordingListener {
        successes: Mutex<Vec<(u32, u32)>>,
        errors: Mutex<Vec<FetchError>>,
    }

    impl RecordingListener {
        /// Creates an empty recorder.
        pub fn new() -> Self {
            Self::default()
        }

        /// Dimensions of every image reported through `on_success`.
        pub fn successes(&self) -> Vec<(u32, u32)> {
            self.successes.lock().clone()
        }

        /// Every error reported through `on_error`.
        pub fn errors(&self) -> Vec<FetchError> {
            self.errors.lock().clone()
        }
    }

    impl FetchListener for RecordingListener {
        fn on_success(&self, image: &DecodedImage) {
            self.successes.lock().push((image.width(), image.height()));
        }

        fn on_error(&self, error: &FetchError) {
            self.errors.lock().push(error.clone());
        }
    }
}
