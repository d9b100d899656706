//! CastHub - Extension host for the CastHub broker
//!
//! This binary runs one bundled extension against a broker, keeping it
//! connected, configured, and scheduled until stopped.
//!
//! # Usage
//!
//! ```bash
//! # Run the timers extension against a local broker
//! casthub run timers
//!
//! # Run against a remote broker with a faster heartbeat
//! casthub run songlist --host broker.lan --port 3000 --heartbeat-ms 2000
//!
//! # List the bundled extensions
//! casthub list
//!
//! # Enable debug logging
//! RUST_LOG=casthub_runtime=debug casthub run alerts
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::process;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use casthub_ext::{Alerts, RandomFact, SongList, Timers};
use casthub_runtime::{Extension, ExtensionRuntime, RuntimeConfig};

/// Names of the bundled extensions, as accepted by `run`.
const BUNDLED: &[&str] = &["randomfact", "songlist", "alerts", "timers"];

/// CastHub - broker extension host
#[derive(Parser, Debug)]
#[command(name = "casthub", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one bundled extension
    Run {
        /// Extension name (see `casthub list`)
        extension: String,

        /// Broker hostname or address
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Broker TCP port
        #[arg(long, default_value_t = 3000)]
        port: u16,

        /// Heartbeat interval in milliseconds
        #[arg(long, default_value_t = 5000)]
        heartbeat_ms: u64,

        /// Directory for timer overlay files (timers extension only)
        #[arg(long, default_value = "timerfiles")]
        timer_dir: String,
    },
    /// List the bundled extensions
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("casthub=info".parse()?)
                .add_directive("casthub_runtime=info".parse()?)
                .add_directive("casthub_ext=info".parse()?),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run {
            extension,
            host,
            port,
            heartbeat_ms,
            timer_dir,
        } => {
            let config = RuntimeConfig {
                host,
                port,
                heartbeat_interval: Duration::from_millis(heartbeat_ms),
                ..RuntimeConfig::default()
            };

            info!(
                version = env!("CARGO_PKG_VERSION"),
                pid = process::id(),
                extension = %extension,
                "CastHub starting"
            );

            match extension.as_str() {
                "randomfact" => host_extension(RandomFact::new(), config).await,
                "songlist" => host_extension(SongList::new(), config).await,
                "alerts" => host_extension(Alerts::new(), config).await,
                "timers" => host_extension(Timers::new(timer_dir), config).await,
                other => {
                    bail!("unknown extension '{other}' (available: {})", BUNDLED.join(", "))
                }
            }
        }
        Command::List => {
            for name in BUNDLED {
                println!("{name}");
            }
            Ok(())
        }
    }
}

/// Hosts one extension until a shutdown signal arrives.
async fn host_extension<E: Extension>(extension: E, config: RuntimeConfig) -> Result<()> {
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mut runtime = ExtensionRuntime::new(extension, config, cancel_token)?;
    runtime.run().await?;

    info!("CastHub stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
