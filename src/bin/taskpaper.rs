//! taskpaper: keeps today's urgent tasks on the desktop wallpaper.
//!
//! Tracing output goes to stderr; in `run` mode stdout carries the host JSON
//! protocol.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use taskpaper::host::{HostCommandRouter, run_stdio_bridge};
use taskpaper::{PaperConfig, diagnostics, paper_dirs, startup};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Calendar-driven task wallpaper.
#[derive(Parser)]
#[command(name = "taskpaper", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the stdio host bridge until stopped.
    Run,

    /// Refresh once and print the cycle result as JSON.
    Once,

    /// Print the wallpaper ledger and the current wallpaper.
    Status,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(dispatch(cli));
    // A pending stdin read holds a blocking thread that never finishes.
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(PaperConfig::default_config_path);
    let config = PaperConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let _log_guard = diagnostics::init_logging(&config.logging, &paper_dirs::logs_dir())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Once => once(&config).await,
        Command::Status => status(&config),
    }
}

async fn run(config: &PaperConfig) -> anyhow::Result<ExitCode> {
    info!(version = env!("CARGO_PKG_VERSION"), "taskpaper starting");
    let runtime = startup::initialize(config)?;
    let shutdown = CancellationToken::new();

    let handle = runtime.scheduler.handle();
    let events = handle.subscribe();
    let scheduler_task = runtime.scheduler.run(shutdown.clone());

    let router = HostCommandRouter::new(handle, shutdown.clone());
    let mut bridge = tokio::spawn(run_stdio_bridge(router, events, shutdown.clone()));

    let finished = tokio::select! {
        joined = &mut bridge => Some(joined),
        () = shutdown.cancelled() => None,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for Ctrl+C");
            }
            info!("interrupted; shutting down");
            None
        }
    };
    shutdown.cancel();

    let joined = match finished {
        Some(joined) => joined,
        None => bridge.await,
    };
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "host bridge exited with error"),
        Err(e) => error!(error = %e, "host bridge task failed"),
    }
    scheduler_task
        .await
        .context("scheduler task failed")?;

    info!("taskpaper shut down cleanly");
    Ok(ExitCode::SUCCESS)
}

async fn once(config: &PaperConfig) -> anyhow::Result<ExitCode> {
    let runtime = startup::initialize(config)?;
    let result = runtime.scheduler.handle().refresh_now().await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.status().is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn status(config: &PaperConfig) -> anyhow::Result<ExitCode> {
    // Read-only: a running daemon may own the directory.
    let dir = config.artifacts.resolved_dir();
    let records = taskpaper::ArtifactStore::inspect(&dir);
    let current = records.iter().find(|r| r.is_current).map(|r| r.path.clone());
    let report = serde_json::json!({
        "dir": dir,
        "keep": config.artifacts.keep.max(1),
        "current": current,
        "artifacts": records,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}
