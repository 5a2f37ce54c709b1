//! CLI command implementations

mod allocate;
mod keygen;
mod logs;
mod status;
mod stop;
mod up;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use burrow_core::network::allocate_network;
use burrow_deployer::Deployer;

use crate::settings::CliConfig;

pub use allocate::allocate_command;
pub use keygen::keygen_command;
pub use logs::logs_command;
pub use status::status_command;
pub use stop::stop_command;
pub use up::{up_command, UpOptions};

/// Which host and tunnel a command acts on
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Remote host (overrides config)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Remote user
    #[arg(short, long)]
    pub user: Option<String>,

    /// SSH port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SSH private key
    #[arg(short, long)]
    pub identity: Option<PathBuf>,

    /// Tunnel client id (1-254)
    #[arg(short = 'n', long)]
    pub client_id: Option<u32>,

    /// Password for sudo on the remote host
    #[arg(long, env = "BURROW_REMOTE_SUDO_PASSWORD", hide_env_values = true)]
    pub remote_sudo_password: Option<String>,
}

impl TargetArgs {
    /// Override `config` with the flags that were given
    pub fn apply(&self, config: &mut CliConfig) {
        if let Some(host) = &self.host {
            config.deployer.host = host.clone();
        }
        if let Some(user) = &self.user {
            config.deployer.username = user.clone();
        }
        if let Some(port) = self.port {
            config.deployer.port = port;
        }
        if let Some(path) = &self.identity {
            config.deployer.auth = burrow_core::config::SshAuth::KeyFile {
                path: path.clone(),
                passphrase: None,
            };
        }
        if let Some(id) = self.client_id {
            config.tunnel.client_id = id;
        }
        if let Some(password) = &self.remote_sudo_password {
            config.deployer.sudo_password = Some(password.clone());
        }
    }
}

/// Open a session to the configured host
async fn connect(config: &CliConfig) -> Result<Deployer> {
    let deployer = Deployer::new(config.deployer.clone());
    deployer.connect().await.with_context(|| {
        format!(
            "Failed to connect to {}@{}:{}",
            config.deployer.username, config.deployer.host, config.deployer.port
        )
    })?;
    Ok(deployer)
}

/// Endpoint listen port for the configured client id
fn listen_port(config: &CliConfig) -> Result<u16> {
    let allocation = allocate_network(config.tunnel.client_id)
        .with_context(|| format!("Invalid client id {}", config.tunnel.client_id))?;
    Ok(allocation.listen_port)
}

/// Close the session, logging rather than failing
async fn close(deployer: &Deployer) {
    if let Err(e) = deployer.close().await {
        tracing::warn!("Closing session to {}: {}", deployer.host(), e);
    }
}
