//! The `burrow` configuration file
//!
//! One TOML file with a `[deployer]` section (how to reach the remote host)
//! and a `[tunnel]` section (which tunnel to build). Command-line flags
//! override both.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use burrow_core::config::{self, DeployerConfig};

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub deployer: DeployerConfig,
    pub tunnel: TunnelSettings,
}

/// Which tunnel to build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Client identifier; selects subnet, addresses and port
    pub client_id: u32,

    /// Private addresses behind the remote host to reach through the tunnel
    pub routed_addrs: Vec<String>,

    /// Remote interface tunnel traffic is forwarded through
    pub egress_interface: Option<String>,

    /// Persistent keepalive in seconds
    pub keepalive: Option<u16>,

    /// Where local interface configuration files are written
    pub config_dir: PathBuf,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            client_id: 1,
            routed_addrs: vec![],
            egress_interface: None,
            keepalive: Some(25),
            config_dir: config::default_config_dir().join("tunnels"),
        }
    }
}

impl CliConfig {
    /// Load `path`, or the default config file when it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return config::load_config(path)
                .with_context(|| format!("Failed to load config from {:?}", path));
        }

        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path)
                .with_context(|| format!("Failed to load config from {:?}", default_path))
        } else {
            tracing::debug!("No config at {:?}; using defaults", default_path);
            Ok(Self::default())
        }
    }
}
