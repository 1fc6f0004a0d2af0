//! Cache and fetch configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::application::services::DEFAULT_MAX_DOWNSAMPLE_ATTEMPTS;
use crate::infrastructure::image::CoordinatorConfig;
use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_DISK_BYTES, FORMAT_VERSION};
use crate::infrastructure::image::memory_cache::DEFAULT_MAX_MEMORY_BYTES;

pub(crate) const APP_QUALIFIER: &str = "dev";
pub(crate) const APP_ORGANIZATION: &str = "thumbcache";
pub(crate) const APP_NAME: &str = "thumbcache";
pub(crate) const CONFIG_FILE_NAME: &str = "config.toml";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Configuration read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache root. Defaults to the platform cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Memory tier settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Disk tier settings.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Fetch pipeline settings.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Memory tier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Upper bound on decoded pixel bytes kept in memory.
    #[serde(default = "default_memory_bytes")]
    pub max_bytes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_memory_bytes(),
        }
    }
}

/// Disk tier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Upper bound on committed value bytes.
    #[serde(default = "default_disk_bytes")]
    pub max_bytes: u64,

    /// On-disk format version. Changing it discards the stored entries.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_disk_bytes(),
            format_version: default_format_version(),
        }
    }
}

/// Fetch pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Downsample factors tried before a fetch fails.
    #[serde(default = "default_downsample_attempts")]
    pub max_downsample_attempts: u32,

    /// Default bounding width.
    #[serde(default = "default_bound")]
    pub max_width: u32,

    /// Default bounding height.
    #[serde(default = "default_bound")]
    pub max_height: u32,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum concurrent downloads.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_downloads: usize,
}

impl FetchConfig {
    /// Request timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_downsample_attempts: default_downsample_attempts(),
            max_width: default_bound(),
            max_height: default_bound(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_downloads: default_concurrency(),
        }
    }
}

const fn default_memory_bytes() -> usize {
    DEFAULT_MAX_MEMORY_BYTES
}

const fn default_disk_bytes() -> u64 {
    DEFAULT_MAX_DISK_BYTES
}

const fn default_format_version() -> u32 {
    FORMAT_VERSION
}

const fn default_downsample_attempts() -> u32 {
    DEFAULT_MAX_DOWNSAMPLE_ATTEMPTS
}

const fn default_bound() -> u32 {
    256
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_concurrency() -> usize {
    4
}

impl CacheConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(max_memory_bytes) = args.max_memory_bytes {
            self.memory.max_bytes = max_memory_bytes;
        }
        if let Some(max_disk_bytes) = args.max_disk_bytes {
            self.disk.max_bytes = max_disk_bytes;
        }
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("thumbcache.log"))
    }

    /// Returns the platform cache directory, or the temp dir if the platform
    /// has none.
    #[must_use]
    pub fn default_cache_root() -> PathBuf {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
            || std::env::temp_dir().join(APP_NAME),
            |dirs| dirs.cache_dir().to_path_buf(),
        )
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }

    /// Returns effective cache root.
    #[must_use]
    pub fn effective_cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(Self::default_cache_root)
    }

    /// Coordinator settings derived from this configuration.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            root_dir: self.effective_cache_root(),
            max_memory_bytes: self.memory.max_bytes,
            max_disk_bytes: self.disk.max_bytes,
            format_version: self.disk.format_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"
            cache_dir = "/var/cache/thumbs"

            [disk]
            max_bytes = 2048

            [fetch]
            max_width = 96
        "#;

        let config: CacheConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/thumbs")));
        assert_eq!(config.disk.max_bytes, 2048);
        assert_eq!(config.disk.format_version, FORMAT_VERSION);
        assert_eq!(config.fetch.max_width, 96);
        assert_eq!(config.fetch.max_height, 256);
        assert_eq!(config.memory, MemoryConfig::default());
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();

        assert_eq!(config.memory.max_bytes, DEFAULT_MAX_MEMORY_BYTES);
        assert_eq!(config.disk.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.fetch.max_downsample_attempts, 5);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config: CacheConfig = toml::from_str("log_level = \"warn\"").unwrap();
        let args = CliArgs::parse_from([
            "thumbcache",
            "--log-level",
            "trace",
            "--cache-dir",
            "/tmp/thumbs",
            "--max-disk-bytes",
            "4096",
            "stats",
        ]);

        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.effective_cache_root(), PathBuf::from("/tmp/thumbs"));
        assert_eq!(config.disk.max_bytes, 4096);
        assert_eq!(config.memory.max_bytes, DEFAULT_MAX_MEMORY_BYTES);
    }

    #[test]
    fn test_coordinator_config_mapping() {
        let mut config = CacheConfig::default();
        config.cache_dir = Some(PathBuf::from("/data/cache"));
        config.disk.format_version = 3;

        let coordinator = config.coordinator_config();

        assert_eq!(coordinator.root_dir, PathBuf::from("/data/cache"));
        assert_eq!(coordinator.format_version, 3);
        assert_eq!(coordinator.max_disk_bytes, config.disk.max_bytes);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = CacheConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: CacheConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.fetch, config.fetch);
        assert_eq!(parsed.disk, config.disk);
    }
}
