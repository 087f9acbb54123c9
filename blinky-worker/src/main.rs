//! blinky-worker - call-audio processing worker
//!
//! Reads job descriptors (newline-delimited JSON) from stdin or a file,
//! denoises and loudness-normalizes each input with ffmpeg, uploads the
//! result to the local artifact bucket and records every job in SQLite.

use anyhow::{Context, Result};
use blinky_common::config::{load_toml_config, resolve_config_path};
use blinky_common::events::EventBus;
use blinky_worker::audio::{Engine, TokioProcessRunner};
use blinky_worker::config::{ConfigOverrides, WorkerConfig, MODULE_NAME};
use blinky_worker::db::{self, SqliteJobStore};
use blinky_worker::sinks::{LocalArtifactSink, TracingMetricsSink};
use blinky_worker::workflow::{JobSource, WorkerContext, WorkerPool};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for blinky-worker
#[derive(Parser, Debug)]
#[command(name = "blinky-worker")]
#[command(about = "Call-audio denoise and loudness normalization worker")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "BLINKY_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder (database and artifact bucket)
    #[arg(long, env = "BLINKY_DATA_FOLDER")]
    data_folder: Option<PathBuf>,

    /// Number of worker tasks
    #[arg(short = 'n', long, env = "BLINKY_CONCURRENCY")]
    concurrency: Option<usize>,

    /// ffmpeg executable
    #[arg(long, env = "BLINKY_FFMPEG")]
    ffmpeg: Option<String>,

    /// ffprobe executable
    #[arg(long, env = "BLINKY_FFPROBE")]
    ffprobe: Option<String>,

    /// Model file for the neural denoiser
    #[arg(long, env = "BLINKY_NEURAL_MODEL")]
    neural_model: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "BLINKY_DATABASE")]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BLINKY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Read job descriptors from this file instead of stdin
    #[arg(long)]
    jobs: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            data_folder: self.data_folder.clone(),
            ffmpeg_path: self.ffmpeg.clone(),
            ffprobe_path: self.ffprobe.clone(),
            concurrency: self.concurrency,
            neural_model_path: self.neural_model.clone(),
            database_path: self.database.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), MODULE_NAME);
    let mut config: WorkerConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides(args.overrides());

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting blinky-worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file location, using defaults"),
    }

    config.validate().context("Invalid configuration")?;

    let data = config.resolve_data_folder(args.data_folder.clone());
    data.ensure_directory_exists()
        .context("Failed to initialize data folder")?;
    info!("Data folder: {}", data.data_folder().display());

    let engine = Engine::new(
        Arc::new(TokioProcessRunner),
        config.engine.ffmpeg_path.as_str(),
        config.engine.ffprobe_path.as_str(),
    );
    engine
        .verify_available(config.timeouts.measurement())
        .await
        .context("ffmpeg/ffprobe are required")?;
    info!(
        ffmpeg = %config.engine.ffmpeg_path,
        ffprobe = %config.engine.ffprobe_path,
        "Engine available"
    );

    let db_path = config.database_path(&data);
    info!("Database: {}", db_path.display());
    let db_pool = db::init_database_pool(&db_path).await?;
    let store = Arc::new(
        SqliteJobStore::new(db_pool).with_max_lock_wait(config.database.max_lock_wait_ms),
    );

    let artifacts = Arc::new(LocalArtifactSink::new(
        config.artifact_root(&data),
        config.storage.bucket.clone(),
        Duration::from_secs(config.storage.presign_expiry_secs),
    ));
    let metrics = Arc::new(TracingMetricsSink::new());
    let events = EventBus::new(config.worker.event_capacity);
    spawn_event_logger(&events);

    let ctx = Arc::new(WorkerContext::from_config(
        &config,
        engine,
        store.clone(),
        artifacts,
        metrics.clone(),
        events.clone(),
    ));

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(config.worker.queue_capacity);
    let workers = WorkerPool::spawn(ctx, rx, config.worker.concurrency, cancel.clone());

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.jobs {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open job file {}", path.display()))?;
            info!("Reading jobs from {}", path.display());
            Box::new(BufReader::new(file))
        }
        None => {
            info!("Reading jobs from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };
    let source = JobSource::new(reader, tx, store, events);
    let source_task = tokio::spawn(source.run(cancel.clone()));

    let mut workers_done = tokio::spawn(workers.join());
    let processed = tokio::select! {
        result = &mut workers_done => result.context("Worker pool panicked")?,
        _ = shutdown_signal() => {
            cancel.cancel();
            workers_done.await.context("Worker pool panicked")?
        }
    };

    if source_task.is_finished() {
        match source_task.await {
            Ok(Ok(stats)) => debug!(accepted = stats.accepted, dropped = stats.dropped, "Source stats"),
            Ok(Err(e)) => warn!(error = %e, "Job source stopped with error"),
            Err(e) => warn!(error = %e, "Job source panicked"),
        }
    } else {
        source_task.abort();
    }

    let snapshot = metrics.snapshot();
    info!(
        processed,
        succeeded = snapshot.succeeded,
        failed = snapshot.failed,
        "Shutdown complete"
    );
    Ok(())
}

/// Log every job event at debug level
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(event = event.event_type(), job_id = ?event.job_id(), "Job event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
