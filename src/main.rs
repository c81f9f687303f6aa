#![forbid(unsafe_code)]

//! `ensembled`: project session daemon binary.
//!
//! Bootstraps configuration, discovers the projects on disk, and starts
//! the dispatch loop, the task watchdog and the IPC server.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ensemble::bus::channel::ChannelBus;
use ensemble::config::GlobalConfig;
use ensemble::ipc::server::spawn_ipc_server;
use ensemble::orchestrator::daemon::Daemon;
use ensemble::orchestrator::dispatch::{self, EVENT_CAPACITY};
use ensemble::orchestrator::task_watchdog::spawn_task_watchdog;
use ensemble::services::launcher::ProcessLauncher;
use ensemble::services::Services;
use ensemble::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ensembled", about = "Audio project session daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the directory projects are created in and discovered from.
    #[arg(long)]
    projects_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("ensembled bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(dir) = args.projects_dir {
        config.override_projects_dir(dir)?;
    }
    info!(projects_dir = %config.projects_dir.display(), "configuration loaded");

    // ── Build the daemon core ───────────────────────────
    let bus = ChannelBus::default();
    let signals = bus.signal_sender();
    let launcher = ProcessLauncher::new(config.ipc_name.clone());
    let services = Services::new(Box::new(bus), Box::new(launcher));

    let ipc_name = config.ipc_name.clone();
    let poll_interval = config.tasks.poll_interval();
    let mut daemon = Daemon::new(config, services);
    match daemon.scan_projects() {
        Ok(count) => info!(count, "projects discovered"),
        Err(err) => warn!(%err, "project discovery failed"),
    }

    // ── Start tasks ─────────────────────────────────────
    let ct = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

    let dispatch_handle = tokio::spawn(dispatch::run(daemon, events_rx, ct.clone()));
    let watchdog_handle = spawn_task_watchdog(events_tx.clone(), poll_interval, ct.clone());
    let ipc_handle = spawn_ipc_server(&ipc_name, events_tx, signals, ct.clone()).map_err(|err| {
        error!(%err, "ipc server start failed");
        ct.cancel();
        err
    })?;

    info!("ensembled ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    let (dispatch_result, _, _) = tokio::join!(dispatch_handle, watchdog_handle, ipc_handle);
    if let Err(err) = dispatch_result {
        error!(%err, "dispatch task failed");
    }
    info!("ensembled shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
