use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use thumbcache::application::FetchImageUseCase;
use thumbcache::infrastructure::{
    CacheConfig, CacheCoordinator, CliArgs, Command, ConfigStore, HttpImageSource, ImageLoader,
    ImageLoaderConfig,
};

fn init_logging(config: &CacheConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<CacheConfig> {
    let store = ConfigStore::new()?;
    let mut config = store.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn fetch(
    config: &CacheConfig,
    coordinator: &CacheCoordinator,
    urls: Vec<String>,
    max_width: u32,
    max_height: u32,
) -> Result<()> {
    let source = Arc::new(HttpImageSource::new(config.fetch.timeout())?);
    let fetcher = FetchImageUseCase::new(Arc::new(coordinator.clone()), source)
        .with_max_downsample_attempts(config.fetch.max_downsample_attempts);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let loader = ImageLoader::new(
        fetcher,
        ImageLoaderConfig {
            max_concurrent_downloads: config.fetch.max_concurrent_downloads,
        },
        &event_tx,
    );

    let total = urls.len();
    for (slot, url) in urls.into_iter().enumerate() {
        loader.load_async(slot, url, max_width, max_height);
    }

    let mut failures = 0usize;
    for _ in 0..total {
        let Some(event) = event_rx.recv().await else {
            break;
        };
        match event.result {
            Ok(loaded) => println!(
                "{}\t{}x{}\t{}\t{}",
                event.url,
                loaded.image.width(),
                loaded.image.height(),
                loaded.source,
                loaded.key
            ),
            Err(e) => {
                failures += 1;
                warn!(url = %event.url, error = %e, "Fetch failed");
                eprintln!("{}\terror: {e}", event.url);
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{failures} of {total} fetches failed"));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = thumbcache::VERSION, "Starting thumbcache");

    let coordinator = CacheCoordinator::new(config.coordinator_config());
    coordinator.initialize(&config.effective_cache_root()).await;

    let result = match args.command {
        Command::Fetch {
            urls,
            max_width,
            max_height,
        } => {
            let max_width = max_width.unwrap_or(config.fetch.max_width);
            let max_height = max_height.unwrap_or(config.fetch.max_height);
            fetch(&config, &coordinator, urls, max_width, max_height).await
        }
        Command::Stats => {
            println!("{}", coordinator.stats().await);
            Ok(())
        }
        Command::Clear => {
            coordinator.clear_all().await;
            println!("Cache cleared");
            Ok(())
        }
    };

    coordinator.flush().await;
    result
}
