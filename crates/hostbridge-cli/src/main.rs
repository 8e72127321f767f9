//! Hostbridge CLI - serve a shell command engine to an editor
//!
//! The editor launches `hostbridge` and talks JSON-RPC over its stdin/stdout,
//! so logs never go to stdout: they go to stderr or to a log file.

mod engine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use hostbridge_core::config::{Config, ConfigManager, LoggingConfig};
use hostbridge_core::{ExitStatus, Session};
use hostbridge_protocol::{transport, JsonRpcChannel};

use engine::{EngineConsole, ShellEngine};

#[derive(Parser)]
#[command(name = "hostbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Editor integration host for shell command engines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace directory (overrides the config file)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session over stdin/stdout (default)
    Serve,

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };

    if let Some(workspace) = &cli.workspace {
        config_manager.config_mut().session.workspace_path = Some(resolve_workspace(workspace));
    }
    if let Some(log_file) = &cli.log_file {
        config_manager.config_mut().logging.file = Some(log_file.clone());
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let _guard = init_logging(&config_manager.config().logging, cli.verbose)?;
            serve(config_manager.into_config()).await
        }
        Commands::Config { init } => show_config(&config_manager, init),
    }
}

/// Absolute workspace path, without the UNC prefix on Windows
fn resolve_workspace(workspace: &Path) -> PathBuf {
    dunce::canonicalize(workspace).unwrap_or_else(|_| {
        if workspace.is_absolute() {
            workspace.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(workspace))
                .unwrap_or_else(|_| workspace.to_path_buf())
        }
    })
}

/// Install the global subscriber; the guard must live until exit
fn init_logging(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let directives = if verbose {
        "info,hostbridge_core=debug,hostbridge_protocol=debug,hostbridge=debug"
    } else {
        logging.filter.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let workspace = match &config.session.workspace_path {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("Failed to determine working directory")?,
    };

    let channel = Arc::new(JsonRpcChannel::new(transport::stdio()));
    let console = EngineConsole::new();
    let engine = Arc::new(ShellEngine::new(Arc::clone(&console), workspace));
    let session = Session::new(channel, engine, console, &config)?;

    let exited = session.exited();
    session.start().await?;
    info!(id = %session.id(), "Serving session over stdio");

    let status = tokio::select! {
        status = exited.clone().wait() => status,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping session");
            match session.stop().await {
                Ok(status) => status,
                // Exit was already under way; wait for it to finish
                Err(_) => exited.wait().await,
            }
        }
    };

    match status {
        ExitStatus::Clean => Ok(()),
        ExitStatus::ChannelClosed => {
            warn!("Client disconnected without an exit notification");
            Ok(())
        }
        ExitStatus::ShutdownFailed(e) => anyhow::bail!("Session shutdown failed: {}", e),
        ExitStatus::StartupFailed(e) => anyhow::bail!("Session failed to start: {}", e),
    }
}

fn show_config(manager: &ConfigManager, init: bool) -> anyhow::Result<()> {
    if init {
        manager.save()?;
        println!(
            "{} {}",
            style("Wrote").green(),
            style(manager.config_path().display()).bold()
        );
        return Ok(());
    }

    println!("{}", style("Configuration:").bold());
    println!();
    println!(
        "  Config file: {}{}",
        style(manager.config_path().display()).green(),
        if manager.config_path().exists() {
            ""
        } else {
            " (not found, using defaults)"
        }
    );
    println!();

    let content = toml::to_string_pretty(manager.config()).context("Failed to render config")?;
    for line in content.lines() {
        println!("  {}", line);
    }
    Ok(())
}
