//! adwd - issue worker daemon entry point.

use adwd::{AppResult, Worker, WorkerConfig};
use adw_core::{config as core_config, IssueStore};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// ADW issue worker daemon.
#[derive(Parser)]
#[command(name = "adwd")]
#[command(about = "Worker daemon that processes queued issues")]
#[command(version)]
struct Cli {
    /// Unique identifier for this worker instance
    #[arg(long)]
    worker_id: String,

    /// Seconds to sleep between polls when no work is available
    #[arg(long, default_value_t = 10)]
    poll_interval: i64,

    /// Seconds a single workflow run may take before it is killed and the
    /// issue requeued (WORKFLOW_TIMEOUT_SECONDS overrides when valid)
    #[arg(long, default_value_t = 3600)]
    workflow_timeout: i64,

    /// Log level: DEBUG, INFO, WARNING, ERROR, or CRITICAL
    #[arg(long, default_value = "INFO")]
    log_level: String,

    /// Directory to run the worker from
    #[arg(long)]
    working_dir: Option<PathBuf>,
}

fn build_config(cli: &Cli) -> AppResult<WorkerConfig> {
    // The env override wins when present and valid; invalid values fall back
    // to the CLI value with a warning.
    let timeout = core_config::workflow_timeout_secs(cli.workflow_timeout.max(0) as u64) as i64;
    Ok(WorkerConfig::new(
        cli.worker_id.clone(),
        cli.poll_interval,
        timeout,
        cli.log_level.clone(),
        cli.working_dir.clone(),
    )?)
}

async fn run(config: WorkerConfig) -> AppResult<()> {
    let store = IssueStore::from_env()?;
    let worker = Worker::new(config, store);
    let shutdown = worker.shutdown_token();

    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down gracefully"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down gracefully"),
        }
        shutdown.cancel();
    });

    worker.run().await;
    Ok(())
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid worker configuration: {e:#}");
            std::process::exit(2);
        }
    };

    if let Some(dir) = &config.working_dir {
        if let Err(e) = std::env::set_current_dir(dir) {
            eprintln!("failed to change working directory to {}: {e}", dir.display());
            std::process::exit(2);
        }
    }

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.tracing_directive())),
        )
        .init();
    if let Some(dir) = &config.working_dir {
        info!(dir = %dir.display(), "working directory set");
    }
    info!(worker_id = %config.worker_id, "worker initialized");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    if let Err(e) = runtime.block_on(run(config)) {
        error!("worker failed to start: {e:#}");
        std::process::exit(1);
    }
}
