//! burrow tunnel endpoint daemon
//!
//! Started by the deployer inside its per-port work directory. Runs until a
//! signal arrives, the controller heartbeat goes stale or the engine exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_core::config::{self, EndpointConfig};
use burrow_core::exec::LocalRunner;
use burrow_core::pidfile::{pid_path, PidFileGuard};
use burrow_server::{ShutdownReason, TunnelEndpoint};

/// Upper bound on any single interface or firewall command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(name = "burrow-server")]
#[command(about = "burrow tunnel endpoint")]
#[command(version)]
struct Args {
    /// Path to the endpoint configuration file
    #[arg(short, long, default_value = "server.toml")]
    config: PathBuf,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("burrow endpoint starting...");

    let config: EndpointConfig = config::load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create work dir {:?}", config.work_dir))?;
    let _pid_guard = PidFileGuard::new(pid_path(&config.work_dir), std::process::id())
        .context("Failed to write PID file")?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let runner = Arc::new(LocalRunner::with_timeout(COMMAND_TIMEOUT));
    let endpoint = TunnelEndpoint::new(config, runner);

    endpoint
        .register_configured_peers()
        .await
        .context("Failed to register configured peers")?;
    endpoint.start().await.context("Failed to start endpoint")?;

    match endpoint.run_until_shutdown(cancel).await {
        ShutdownReason::EngineExited { code } => {
            anyhow::bail!("Tunnel engine exited unexpectedly (exit code {:?})", code)
        }
        reason => {
            tracing::info!("Endpoint shutdown complete ({:?})", reason);
            Ok(())
        }
    }
}
