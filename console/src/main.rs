//! file-handles: open file handle console
//!
//! `serve` runs the management console and the attach listener.
//! `attach` is the helper mode the console launches to install the leak
//! agent into a running process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use fhd_console::{helper, load_config, start_management_server, ConsoleConfig, ConsoleState};
use leak_agent::attach::AttachListener;

#[derive(Parser)]
#[command(name = "file-handles", version, about = "Open file handle console and leak agent helper")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the management console
    Serve {
        /// Path to the TOML config file
        #[arg(long, env = "FHD_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Attach the leak agent to a running process
    Attach {
        /// Target process id
        pid: u32,
        /// Agent options, comma separated
        options: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Attach { pid, options } => Ok(helper::run(pid, options.as_deref())),
        Command::Serve { config } => {
            let filter = init_tracing();
            let config = load_config(config.as_deref())?;
            apply_log_level(&filter, &config)?;

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?
                .block_on(serve(config))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Start logging before anything else runs, at `RUST_LOG` or `info`
fn init_tracing() -> reload::Handle<EnvFilter, Registry> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();
    handle
}

/// Switch to the configured level unless `RUST_LOG` was given
fn apply_log_level(
    handle: &reload::Handle<EnvFilter, Registry>,
    config: &ConsoleConfig,
) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        return Ok(());
    }
    handle
        .reload(EnvFilter::new(&config.logging.level))
        .context("Failed to apply configured log level")
}

async fn serve(config: ConsoleConfig) -> Result<()> {
    info!("file-handles console starting (pid {})", std::process::id());

    // Held for the lifetime of the server; dropping it removes the socket.
    let _attach = AttachListener::start().context("Failed to start attach listener")?;

    let state = ConsoleState::from_config(&config).context("Failed to resolve attach helper")?;
    start_management_server(&config.server.listen_addr, state)
        .await
        .context("Management server failed")
}
