//! Binary entrypoint for sealed-reader.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use sealed_reader::config::{Configuration, SourceConfig};
use sealed_reader::crypto::{self, Decryptor};
use sealed_reader::display::{BlobRegistry, DecodedImageFactory, DisplayHandleFactory};
use sealed_reader::events::AssetEvent;
use sealed_reader::fetch::{ByteSource, DirectorySource, HttpSource, RetryingFetcher};
use sealed_reader::gallery::{GalleryController, GalleryOptions, GallerySummary};
use sealed_reader::manifest::Manifest;
use sealed_reader::tasks;
use sealed_reader::visibility::Viewport;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Scroll through an encrypted gallery
#[derive(Debug, Parser)]
#[command(name = "sealed-reader", about = "Viewport-gated reader for encrypted image galleries")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Override the scroll tick interval (e.g. 20ms)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    scroll_interval: Option<Duration>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Thumbnail grid of every episode in the library
    Thumbnails,
    /// Pages of one book
    Book {
        /// Directory name of the book below the library path
        name: String,
    },
    /// Gallery read from a JSON manifest
    Manifest {
        file: PathBuf,
        /// Use the page reader margins and reading mode instead of the grid
        #[arg(long)]
        pages: bool,
    },
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("sealed_reader={}", level).parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(interval) = cli.scroll_interval {
        cfg.scroll.interval = interval;
    }
    let cfg = cfg.validated().context("validating configuration")?;

    let (manifest, options) = match &cli.command {
        Command::Thumbnails => (
            Manifest::scan_thumbnails(&cfg.library_path)?,
            cfg.thumbnail_options(),
        ),
        Command::Book { name } => (
            Manifest::scan_book(&cfg.library_path, name)?,
            cfg.page_options(),
        ),
        Command::Manifest { file, pages } => {
            let manifest = Manifest::from_json_file(file)
                .with_context(|| format!("loading manifest {}", file.display()))?;
            let options = if *pages {
                cfg.page_options()
            } else {
                cfg.thumbnail_options()
            };
            (manifest, options)
        }
    };
    info!(
        assets = manifest.len(),
        groups = manifest.groups().len(),
        "manifest loaded"
    );

    let source: Arc<dyn ByteSource> = match &cfg.source {
        SourceConfig::Directory => Arc::new(DirectorySource::new(&cfg.library_path)),
        SourceConfig::Http { base_url } => {
            Arc::new(HttpSource::new(base_url, cfg.fetch.request_timeout)?)
        }
    };
    let fetcher = RetryingFetcher::new(source, cfg.fetch.retry_policy());
    let decryptor = crypto::from_config(&cfg.cipher)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; unmounting");
                cancel.cancel();
            }
        }
    });

    let summary = if cfg.display.decode {
        let factory = match cfg.display.max_live_bytes {
            Some(max) => DecodedImageFactory::with_budget(max),
            None => DecodedImageFactory::new(),
        };
        read(manifest, options, fetcher, decryptor, Arc::new(factory), &cfg, cancel).await?
    } else {
        let factory = match cfg.display.max_live_handles {
            Some(max) => BlobRegistry::with_capacity_limit(max),
            None => BlobRegistry::new(),
        };
        read(manifest, options, fetcher, decryptor, Arc::new(factory), &cfg, cancel).await?
    };

    println!(
        "assets: {}  loaded: {}  failed: {}  released at teardown: {}",
        summary.assets, summary.loaded, summary.failed, summary.released_on_teardown
    );
    Ok(())
}

async fn read<F: DisplayHandleFactory>(
    manifest: Manifest,
    options: GalleryOptions,
    fetcher: RetryingFetcher,
    decryptor: Arc<dyn Decryptor>,
    factory: Arc<F>,
    cfg: &Configuration,
    cancel: CancellationToken,
) -> Result<GallerySummary> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let controller =
        GalleryController::new(manifest, options, fetcher, decryptor, factory).with_events(events_tx);
    let content_height = controller.layout().total_height();
    let (viewport_tx, viewport_rx) = watch::channel(Viewport::new(0.0, cfg.viewport.height));

    let log = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match &event {
                AssetEvent::Failed { index, failure } => warn!(index, %failure, "asset stays blank"),
                AssetEvent::HandleFailed { index, reason } => {
                    warn!(index, reason = %reason, "asset not displayed")
                }
                other => debug!(event = ?other, "asset event"),
            }
        }
    });
    let scroller = tokio::spawn(tasks::scroll::run(
        viewport_tx,
        content_height,
        cfg.scroll.clone(),
        cancel.clone(),
    ));

    let summary = tasks::gallery::run(controller, viewport_rx, cancel).await?;
    scroller.await??;
    log.await?;
    Ok(summary)
}
