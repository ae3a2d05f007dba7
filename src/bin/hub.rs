use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use panel_monitoring::{
    actors::{DispatcherHandle, MonitorHandle},
    config::{Config, StorageConfig, read_config_file},
    notify::{LogNotifier, Notifier, TelegramNotifier},
    panel::VirtualizorClient,
    storage::{MemoryStore, Store},
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: String,

    /// Log at trace level instead of info
    #[arg(short, long)]
    verbose: bool,
}

fn log_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

fn init(verbose: bool) {
    let level = log_level(verbose);
    let filter = filter::Targets::new().with_targets(vec![
        ("panel_monitoring", level),
        ("panelmon_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    dotenv::dotenv().ok();

    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let store = open_store(&config).await?;
    let notifier = build_notifier(&config);

    let dispatcher = DispatcherHandle::spawn(notifier);
    let monitor = MonitorHandle::spawn(
        &config,
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher.clone(),
    );

    info!(
        "hub started, sweeping panels every {}s",
        config.check_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Err(e) = monitor.shutdown().await {
        warn!("monitor shutdown failed: {e}");
    }
    if let Err(e) = dispatcher.shutdown().await {
        warn!("dispatcher shutdown failed: {e}");
    }
    // Let the dispatcher drain queued alerts before the store goes away
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Err(e) = store.close().await {
        warn!("store close failed: {e}");
    }

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            warn!("storage backend 'none': alert state will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            debug!("opening sqlite store at {}", path.display());
            let store = panel_monitoring::storage::sqlite::SqliteStore::new(&path).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    match config.telegram.as_ref().and_then(|t| t.resolve_token()) {
        Some(token) => {
            debug!("telegram delivery enabled");
            Arc::new(TelegramNotifier::new(token))
        }
        None => {
            warn!("no telegram token configured, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    }
}
