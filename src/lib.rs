//! thumbcache - a two-tier thumbnail cache with a bounded fetch pipeline.
//!
//! Decoded images are kept in a byte-bounded memory LRU backed by a
//! journaled disk cache. Misses are downloaded, decoded at a downsample
//! factor that fits the requested bounds, and written back to both tiers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing use cases and services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache tiers, adapters and configuration.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "thumbcache";
