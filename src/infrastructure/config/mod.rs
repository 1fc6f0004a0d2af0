//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{CacheConfig, DiskConfig, FetchConfig, LogLevel, MemoryConfig};
pub use args::{CliArgs, Command};
pub use storage::{ConfigError, ConfigStore};
