//! Traffic Conditions - road segment congestion service
//!
//! Ingests sensor records, accumulates them into the counter store and
//! serves congestion queries over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Serve queries; records arrive via POST /v1/events
//! ./traffic-conditions
//!
//! # Pipe the simulator in
//! ./traffic-sim --segments 66N_1,I-80W | ./traffic-conditions --stdin
//!
//! # Replay a recorded file at 60x
//! ./traffic-conditions --file records.csv --speed 60
//! ```
//!
//! # Environment Variables
//!
//! - `TRAFFIC_CONFIG`: path to the TOML config file
//! - `TRAFFIC_SERVER_ADDR`: bind address override
//! - `RUST_LOG`: logging level (default: info)
//! - `RESET_DB`: set to "true" to wipe the counter database on startup

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use traffic_conditions::api::{create_app, TrafficState};
use traffic_conditions::config::defaults::{REPLAY_BASE_DELAY_MS, SHUTDOWN_GRACE_SECS};
use traffic_conditions::config::{StoreBackend, TrafficConfig};
use traffic_conditions::pipeline::{
    event_channel, ChannelSource, IngestStats, LineSource, ProcessingLoop, RecordSource,
    ReplaySource, SharedEventReceiver, TrafficEventSink,
};
use traffic_conditions::storage::{self, CounterStore};
use traffic_conditions::types::TrafficEvent;
use traffic_conditions::{CongestionClassifier, EventParser, SystemClock};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "traffic-conditions")]
#[command(about = "Road segment traffic ingestion and congestion classification")]
#[command(version)]
struct CliArgs {
    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long, env = "TRAFFIC_SERVER_ADDR")]
    addr: Option<String>,

    /// Path to the TOML config file (skips the default search order)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Read records from stdin, one per line.
    /// Use with the simulator: ./traffic-sim | ./traffic-conditions --stdin
    #[arg(long, conflicts_with = "file")]
    stdin: bool,

    /// Read records from a file, one per line
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Replay speed for --file (1 = one record per second, 60 = 60x faster, 0 = no delay)
    #[arg(long, default_value = "0")]
    speed: u64,

    /// Use the in-memory store regardless of config
    #[arg(long)]
    memory: bool,

    /// Wipe the counter database on startup.
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("RESET_DB")
        .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    RecordLoop,
    SinkWorker(usize),
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::RecordLoop => write!(f, "RecordLoop"),
            Self::SinkWorker(id) => write!(f, "SinkWorker-{id}"),
        }
    }
}

// ============================================================================
// Task Spawning
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn a processing loop that feeds `source` into the event channel.
fn spawn_record_loop<S: RecordSource>(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut source: S,
    processing_loop: ProcessingLoop,
) {
    task_set.spawn(async move {
        let summary = processing_loop.run(&mut source).await;
        info!(
            source = source.source_name(),
            records = summary.records,
            forwarded = summary.forwarded,
            rejected = summary.rejected,
            "[RecordLoop] Finished"
        );
        Ok(TaskName::RecordLoop)
    });
}

fn spawn_sink_workers(
    task_set: &mut JoinSet<Result<TaskName>>,
    sink: &TrafficEventSink,
    events: &SharedEventReceiver,
    workers: usize,
) {
    for id in 0..workers {
        let sink = sink.clone();
        let events = Arc::clone(events);
        task_set.spawn(async move {
            sink.run(events, id).await;
            Ok(TaskName::SinkWorker(id))
        });
    }
}

/// Pick the optional local record source from the CLI flags.
async fn local_source(args: &CliArgs) -> Result<Option<Box<dyn RecordSource>>> {
    if args.stdin {
        info!("Input: stdin (one record per line)");
        return Ok(Some(Box::new(LineSource::stdin())));
    }
    let Some(path) = &args.file else {
        return Ok(None);
    };

    if args.speed == 0 {
        info!(path = %path.display(), "Input: file (streamed, no delay)");
        return Ok(Some(Box::new(LineSource::open(path).await?)));
    }

    // Raw bytes: a line with invalid UTF-8 is rejected on its own by the loop.
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let delay_ms = REPLAY_BASE_DELAY_MS / args.speed;
    let replay = ReplaySource::from_bytes(&contents, delay_ms);
    info!(
        path = %path.display(),
        records = replay.remaining(),
        speed = args.speed,
        delay_ms,
        "Input: file replay"
    );
    Ok(Some(Box::new(replay)))
}

// ============================================================================
// Supervisor
// ============================================================================

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring...");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Let loops and sink workers drain the event channel, bounded by the grace period.
async fn drain_tasks(task_set: &mut JoinSet<Result<TaskName>>) {
    let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
    let drained = tokio::time::timeout(grace, async {
        while let Some(result) = task_set.join_next().await {
            match result {
                Ok(Ok(task_name)) => info!("Shutdown: task {} finished", task_name),
                Ok(Err(e)) => warn!("Shutdown: task ended with error: {}", e),
                Err(e) => warn!("Shutdown: task panicked: {}", e),
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = task_set.len(),
            "Shutdown grace period elapsed, aborting remaining tasks"
        );
        task_set.abort_all();
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    // Load configuration
    let mut config = match &args.config {
        Some(path) => TrafficConfig::load_from_file(path)?,
        None => TrafficConfig::load()?,
    };
    if let Some(addr) = &args.addr {
        config.server.addr.clone_from(addr);
    }
    if args.memory {
        config.store.backend = StoreBackend::Memory;
    }
    let addr = config.server.socket_addr()?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Traffic Conditions v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Interval: {}ms | Lookback: {}x | Threshold: {} | Accident rule: {:?}",
        config.store.interval_ms,
        config.congestion.lookback_multiplier,
        config.congestion.threshold,
        config.congestion.accident_rule
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Reset DB check, before the store is opened
    if config.store.backend == StoreBackend::Sled && should_reset_db(args.reset_db) {
        storage::reset_data_directory(&config.store.path)
            .context("Failed to remove counter data directory")?;
    }

    let store: Arc<dyn CounterStore> =
        storage::open_store(&config.store).context("Failed to open counter store")?;
    let stats = Arc::new(IngestStats::new());
    let clock = Arc::new(SystemClock);
    let parser = EventParser::new(clock.clone());
    let classifier =
        CongestionClassifier::new(Arc::clone(&store), clock, config.congestion.accident_rule);

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Sink workers
    let (events_tx, events_rx) = event_channel(config.ingest.channel_capacity);
    let sink = TrafficEventSink::new(Arc::clone(&store), Arc::clone(&stats), &config.ingest);
    spawn_sink_workers(&mut task_set, &sink, &events_rx, config.ingest.sink_workers);
    drop(events_rx);

    let new_loop = |events: tokio::sync::mpsc::Sender<TrafficEvent>| {
        ProcessingLoop::new(parser.clone(), events, Arc::clone(&stats), cancel_token.clone())
    };

    // HTTP-fed record loop
    let (record_tx, http_source) = ChannelSource::channel(config.ingest.channel_capacity);
    spawn_record_loop(&mut task_set, http_source, new_loop(events_tx.clone()));

    // Optional stdin / file loop
    if let Some(source) = local_source(&args).await? {
        spawn_record_loop(&mut task_set, source, new_loop(events_tx.clone()));
    }
    // Sink workers exit once every loop has released its sender.
    drop(events_tx);

    // HTTP server
    let state = TrafficState::new(classifier, Arc::clone(&stats), &config).with_ingest(record_tx);
    let app = create_app(state, &config.server.cors_origins);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    let outcome = run_supervisor(&mut task_set, cancel_token.clone()).await;
    cancel_token.cancel();
    drain_tasks(&mut task_set).await;

    if let Err(e) = store.flush() {
        error!(error = %e, "Failed to flush counter store");
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("FINAL STATISTICS");
    info!("   {}", stats.snapshot());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    outcome?;
    info!("Traffic Conditions shutdown complete");
    Ok(())
}
