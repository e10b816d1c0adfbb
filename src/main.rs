use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use byte_unit::{Byte, UnitType};
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};
use wqmon::cli::{Args, ClearArgs, Commands, ExportArgs, RecordArgs, WatchArgs};
use wqmon::config::Config;
use wqmon::dashboard::Dashboard;
use wqmon::events::Message;
use wqmon::feed::CompositeFeed;
use wqmon::ingest::Ingestor;
use wqmon::poller::Poller;
use wqmon::registry::DatasetRegistry;
use wqmon::render;
use wqmon::store::HistoryStore;
use wqmon::ui::{DashboardUi, HeadlessRecorder};
use wqmon::viewport::Viewport;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const LOG_FILE: &str = "wqmon.log";

/// Log to a file so the dashboard's screen stays clean; headless commands
/// also log to stderr.
fn init_tracing(log_dir: &Path, to_stderr: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| "wqmon=info".into());
    let stderr = to_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_filter(filter())
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter()),
        )
        .with(stderr)
        .init();

    Ok(guard)
}

fn open_store(args: &Args, config: &Config) -> Result<HistoryStore> {
    let dir = args.history_dir(config);
    HistoryStore::open(&dir).with_context(|| format!("opening history in {}", dir.display()))
}

fn build_poller(config: &Config, tx: mpsc::Sender<Message>) -> Result<Poller> {
    let feed = CompositeFeed::from_config(config).context("building feed")?;
    if feed.is_empty() {
        tracing::warn!("no feed sources configured; nothing will be recorded");
    }
    Ok(Poller::new(
        Arc::new(feed),
        Duration::from_secs(config.interval_secs),
        tx,
    ))
}

async fn watch(args: &Args, watch_args: &WatchArgs) -> Result<()> {
    let config = args.load_config()?;
    let store = open_store(args, &config)?;
    let (tx, rx) = mpsc::channel::<Message>(64);
    let poller = build_poller(&config, tx)?;

    let mut dashboard = Dashboard::new(
        config,
        Some(args.config.clone()),
        store,
        watch_args.export_dir.clone(),
        Utc::now(),
    );

    tracing::info!("dashboard starting");
    let mut ui = DashboardUi::new(rx)?;
    ui.run(&mut dashboard, poller).await?;
    tracing::info!("dashboard closed");
    Ok(())
}

async fn record(args: &Args, record_args: &RecordArgs) -> Result<()> {
    let config = args.load_config()?;
    let store = open_store(args, &config)?;
    let (tx, rx) = mpsc::channel::<Message>(64);
    let poller = build_poller(&config, tx)?;

    let (registry, report) =
        DatasetRegistry::load(&config.tracked_keys, config.retention_hours, &store, Utc::now());
    if let Some(error) = report.error {
        tracing::warn!(%error, "starting without stored history");
    }

    let mut recorder = HeadlessRecorder::new(rx, Ingestor::new(store), registry);
    recorder.run(poller, record_args.limit).await?;
    recorder.print_final_stats();
    Ok(())
}

fn export(args: &Args, export_args: &ExportArgs) -> Result<()> {
    let config = args.load_config()?;
    let store = open_store(args, &config)?;
    let hours = export_args.hours.unwrap_or(config.retention_hours);
    let now = Utc::now();

    let (mut registry, report) = DatasetRegistry::load(&config.tracked_keys, hours, &store, now);
    if let Some(error) = report.error {
        bail!("could not read history: {error}");
    }
    for key in &export_args.hide {
        if registry.toggle_key(key).is_none() {
            tracing::warn!(key = %key, "not a tracked key, ignoring --hide");
        }
    }

    let window = Viewport::trailing(now, registry.retention());
    let csv = render::export_csv(&registry, window)?;
    match &export_args.output {
        Some(path) => {
            fs::write(path, &csv).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Exported {} samples to {}", report.samples, path.display());
        }
        None => io::stdout().write_all(csv.as_bytes())?,
    }
    Ok(())
}

fn clear(args: &Args, clear_args: &ClearArgs) -> Result<()> {
    let config = args.load_config()?;
    let store = open_store(args, &config)?;
    let shards = store.shard_files()?;
    if shards.is_empty() {
        println!("No history to clear in {}", store.dir().display());
        return Ok(());
    }

    if !clear_args.yes {
        print!(
            "Delete {} history shard(s) in {}? [y/N] ",
            shards.len(),
            store.dir().display()
        );
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    let report = store.clear_all()?;
    println!("Deleted {} history shard(s)", report.removed.len());
    Ok(())
}

fn info(args: &Args) -> Result<()> {
    let config = args.load_config()?;
    let store = open_store(args, &config)?;

    println!("History directory: {}", store.dir().display());
    println!("Retention: {} hours", config.retention_hours);
    println!(
        "Tracked keys: {}",
        config
            .tracked_keys
            .iter()
            .map(|k| k.key.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let shards = store.shard_files()?;
    if shards.is_empty() {
        println!("No history shards");
        return Ok(());
    }
    println!("Shards:");
    for (shard, path) in &shards {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let unit = Byte::from_u64(size).get_appropriate_unit(UnitType::Binary);
        println!("  {shard}  {:>10.1} {}", unit.get_value(), unit.get_unit());
    }
    let total = Byte::from_u64(store.disk_usage()?).get_appropriate_unit(UnitType::Binary);
    println!("Total: {:.1} {}", total.get_value(), total.get_unit());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let headless = !matches!(args.command, Commands::Watch(_));
    let _guard = init_tracing(&args.log_dir, headless)?;

    match &args.command {
        Commands::Watch(watch_args) => watch(&args, watch_args).await?,
        Commands::Record(record_args) => record(&args, record_args).await?,
        Commands::Export(export_args) => export(&args, export_args)?,
        Commands::Clear(clear_args) => clear(&args, clear_args)?,
        Commands::Info => info(&args)?,
    }

    Ok(())
}
