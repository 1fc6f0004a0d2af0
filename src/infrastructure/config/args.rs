use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "thumbcache",
    version,
    about = "Fetch, downsample and cache thumbnails",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Cache root directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Memory tier bound in bytes.
    #[arg(long, value_name = "BYTES", global = true)]
    pub max_memory_bytes: Option<usize>,

    /// Disk tier bound in bytes.
    #[arg(long, value_name = "BYTES", global = true)]
    pub max_disk_bytes: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Fetch images into the cache, printing where each one came from.
    Fetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Bounding width.
        #[arg(long)]
        max_width: Option<u32>,

        /// Bounding height.
        #[arg(long)]
        max_height: Option<u32>,
    },
    /// Print cache statistics.
    Stats,
    /// Remove every cached image.
    Clear,
}
