//! burrow CLI
//!
//! Deploys a tunnel endpoint to a remote host over SSH, keeps it alive with
//! a heartbeat and connects this machine to it:
//! - `up` builds the whole tunnel and tears it down on Ctrl+C
//! - `status`, `stop` and `logs` inspect or stop a remote endpoint
//! - `keygen` and `allocate` are offline helpers

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_cli::commands::{self, TargetArgs, UpOptions};
use burrow_cli::settings::CliConfig;
use burrow_client::Credential;

#[derive(Parser)]
#[command(name = "burrow")]
#[command(author, version, about = "Encrypted tunnels to private networks behind SSH hosts")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a tunnel key pair
    Keygen {
        /// Save the pair to this file instead of printing it
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show the subnet, addresses and port for a client id
    Allocate {
        /// Client id (1-254)
        client_id: u32,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Deploy the endpoint, connect to it and hold until Ctrl+C
    Up {
        #[command(flatten)]
        target: TargetArgs,

        /// Private address behind the remote host to route (repeatable)
        #[arg(short, long = "route")]
        routes: Vec<String>,

        /// Remote interface to forward tunnel traffic through
        #[arg(long)]
        egress: Option<String>,

        /// Only run the remote endpoint; leave the local interface alone
        #[arg(long)]
        no_connect: bool,

        /// Use passwordless sudo for local interface commands
        #[arg(long)]
        sudo: bool,

        /// Password for sudo on this machine
        #[arg(long, env = "BURROW_SUDO_PASSWORD", hide_env_values = true)]
        sudo_password: Option<String>,

        /// Print the commands that would run without touching either host
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the remote endpoint's process, heartbeat and session health
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Stop the remote endpoint
    Stop {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the tail of the remote endpoint's logs
    Logs {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of lines per log
        #[arg(short, long, default_value_t = 50)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Keygen { out } => {
            commands::keygen_command(out.as_deref()).await?;
        }

        Commands::Allocate { client_id, json } => {
            commands::allocate_command(client_id, json)?;
        }

        Commands::Up {
            target,
            routes,
            egress,
            no_connect,
            sudo,
            sudo_password,
            dry_run,
        } => {
            let mut config = CliConfig::load(cli.config.as_deref())?;
            target.apply(&mut config);
            if !routes.is_empty() {
                config.tunnel.routed_addrs = routes;
            }
            if egress.is_some() {
                config.tunnel.egress_interface = egress;
            }

            let credential = match (sudo_password, sudo) {
                (Some(password), _) => Credential::SudoPassword(password),
                (None, true) => Credential::Sudo,
                (None, false) => Credential::Root,
            };
            let options = UpOptions {
                connect: !no_connect,
                credential,
                dry_run,
            };

            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());
            commands::up_command(&config, options, cancel).await?;
        }

        Commands::Status { target } => {
            let mut config = CliConfig::load(cli.config.as_deref())?;
            target.apply(&mut config);
            commands::status_command(&config).await?;
        }

        Commands::Stop { target } => {
            let mut config = CliConfig::load(cli.config.as_deref())?;
            target.apply(&mut config);
            commands::stop_command(&config).await?;
        }

        Commands::Logs { target, lines } => {
            let mut config = CliConfig::load(cli.config.as_deref())?;
            target.apply(&mut config);
            commands::logs_command(&config, lines).await?;
        }
    }

    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
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

        cancel.cancel();
    });
}
