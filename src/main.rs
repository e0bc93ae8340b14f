//! Feed Meter CLI
//!
//! Aggregates cumulative meter readings into half-hour, hour, day and month usage.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use feed_meter::{
    config::Config,
    core::FeedProcessor,
    resolver::WindowResolver,
    runtime::{sweep_expired, WorkerPool},
    sink::{JsonLinesSink, RecordSink},
    source::{ReadingSource, SourceEvent},
    state::{InMemoryStateStore, StateSnapshot, StateStore, SystemClock},
    stats::{create_shared_stats_with_persistence, PersistedStats},
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feed-meter")]
#[command(version = VERSION)]
#[command(about = "Per-feed usage aggregation over nested time windows", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate a JSON lines stream of readings
    Run {
        /// Input file, or "-" for standard input
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Directory for the output channel files
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Number of worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Ignore state saved by a previous run
        #[arg(long)]
        fresh: bool,
    },

    /// Show statistics and state saved by previous runs
    Status,

    /// Show configuration
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            workers,
            fresh,
        } => cmd_run(config_path, input, output, workers, fresh),
        Commands::Status => cmd_status(config_path),
        Commands::Config => cmd_config(config_path),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Config::load().context("loading configuration"),
    }
}

fn cmd_run(
    config_path: Option<&Path>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    workers: Option<usize>,
    fresh: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(output) = output {
        config.output_path = output;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.validate().context("invalid configuration")?;
    config
        .ensure_directories()
        .context("creating output directories")?;

    let parser = config.parser()?;
    let ttl = config.ttl.policy()?;
    let store = restore_state(&config, fresh)?;

    println!("Feed Meter v{VERSION}");
    println!();
    println!("  Timezone: {}", parser.timezone());
    println!("  Workers: {}", config.workers);
    println!("  Restored feeds: {}", store.feed_count());
    println!();

    let processor = Arc::new(FeedProcessor::new(
        store,
        SystemClock,
        parser.clone(),
        ttl,
    ));
    let resolver = WindowResolver::new(parser);
    let files = JsonLinesSink::create(&config.output_path).context("opening output channels")?;
    println!("Writing channels to {}", files.dir().display());
    let sink: Arc<dyn RecordSink> = Arc::new(files);
    let stats = create_shared_stats_with_persistence(config.stats_file());

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let source = match input {
        Some(path) if path != Path::new("-") => {
            println!("Reading from {}", path.display());
            ReadingSource::from_path(&path, config.channel_capacity)
                .with_context(|| format!("opening {}", path.display()))?
        }
        _ => {
            println!("Reading from standard input (Ctrl+C to stop)");
            ReadingSource::stdin(config.channel_capacity)
        }
    };

    let pool = WorkerPool::spawn(
        config.workers,
        config.channel_capacity,
        Arc::clone(&processor),
        Arc::clone(&sink),
        Arc::clone(&stats),
    )
    .context("starting workers")?;

    let mut last_sweep = Instant::now();
    let mut exhausted = false;

    while running.load(Ordering::SeqCst) {
        match source.receiver().recv_timeout(Duration::from_millis(100)) {
            Ok(SourceEvent::Reading { line, reading }) => match resolver.resolve(reading) {
                Ok(reading) => {
                    if let Err(e) = pool.dispatch(reading) {
                        tracing::error!("{e}");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(line, "skipping reading: {e}");
                    stats.record_malformed();
                }
            },
            Ok(SourceEvent::Invalid { line, error }) => {
                tracing::warn!(line, "skipping undecodable line: {error}");
                stats.record_malformed();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                exhausted = true;
                break;
            }
        }

        if last_sweep.elapsed() >= config.sweep_interval {
            sweep_expired(&processor, &stats);
            last_sweep = Instant::now();
        }
    }

    println!();
    println!("Stopping...");

    if exhausted {
        source.join();
    } else {
        // The reader may be blocked on an idle stdin; it ends with the process.
        source.stop();
    }
    pool.shutdown();
    sweep_expired(&processor, &stats);

    sink.flush().context("flushing output channels")?;

    processor
        .store()
        .snapshot(Utc::now())
        .and_then(|snapshot| snapshot.save(&config.state_file()))
        .context("saving state")?;

    if let Err(e) = stats.save() {
        tracing::warn!("could not save statistics: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Load the store saved by the previous run, unless starting fresh.
fn restore_state(config: &Config, fresh: bool) -> Result<InMemoryStateStore> {
    let path = config.state_file();
    if fresh || !path.exists() {
        return Ok(InMemoryStateStore::new());
    }

    let snapshot = StateSnapshot::load(&path).with_context(|| {
        format!(
            "restoring state from {} (use --fresh to start over)",
            path.display()
        )
    })?;
    tracing::info!(
        feeds = snapshot.feeds.len(),
        taken_at = %snapshot.taken_at,
        "restored state"
    );
    Ok(InMemoryStateStore::from_snapshot(snapshot, Utc::now()))
}

fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Feed Meter Status");
    println!("=================");
    println!();

    let stats_path = config.stats_file();
    if stats_path.exists() {
        let stats = PersistedStats::read(&stats_path)
            .with_context(|| format!("reading {}", stats_path.display()))?;
        println!("Cumulative Statistics (as of {}):", stats.last_updated);
        println!("  Readings accepted: {}", stats.accepted);
        println!("  Dropped out of order: {}", stats.dropped_out_of_order);
        println!("  Malformed readings: {}", stats.malformed);
        println!("  State failures: {}", stats.state_failures);
        println!("  Sink failures: {}", stats.sink_failures);
        println!(
            "  Window records: {} halfTime, {} hourTime, {} dayTime, {} monthTime",
            stats.half_time, stats.hour_time, stats.day_time, stats.month_time
        );
        println!("  Buckets expired: {}", stats.buckets_expired);
    } else {
        println!("No previous run statistics found.");
    }
    println!();

    let state_path = config.state_file();
    if state_path.exists() {
        let snapshot = StateSnapshot::load(&state_path)
            .with_context(|| format!("reading {}", state_path.display()))?;
        println!("Saved state:");
        println!("  Taken at: {}", snapshot.taken_at);
        println!("  Feeds: {}", snapshot.feeds.len());
    } else {
        println!("No saved state found.");
    }

    Ok(())
}

fn cmd_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", path.display());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("serializing configuration")?
    );
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
