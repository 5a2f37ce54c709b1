//! Local connector configuration

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::keys::KeyPair;
use crate::network::{interface_name, NetworkAllocation, Side, BASE_PORT};

/// Configuration for the local side of a tunnel
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Local private key (base64)
    pub private_key: String,

    /// Endpoint public key (base64)
    pub server_public_key: String,

    /// Host the endpoint is reachable at
    pub server_host: String,

    /// Endpoint UDP listen port
    pub listen_port: u16,

    /// Local address inside the tunnel subnet
    pub client_addr: Ipv4Addr,

    /// Endpoint address inside the tunnel subnet
    pub server_addr: Ipv4Addr,

    /// Private addresses behind the endpoint to route through the tunnel
    pub routed_addrs: Vec<String>,

    /// Directory the interface configuration file is written to
    pub config_dir: PathBuf,

    /// Persistent keepalive in seconds
    pub keepalive: Option<u16>,

    /// Pause after bring-up before `connect` returns
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            server_public_key: String::new(),
            server_host: "localhost".to_string(),
            listen_port: BASE_PORT,
            client_addr: Ipv4Addr::new(10, 99, 0, 2),
            server_addr: Ipv4Addr::new(10, 99, 0, 1),
            routed_addrs: vec![],
            config_dir: super::default_config_dir().join("tunnels"),
            keepalive: Some(25),
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("server_public_key", &self.server_public_key)
            .field("server_host", &self.server_host)
            .field("listen_port", &self.listen_port)
            .field("client_addr", &self.client_addr)
            .field("server_addr", &self.server_addr)
            .field("routed_addrs", &self.routed_addrs)
            .field("config_dir", &self.config_dir)
            .finish_non_exhaustive()
    }
}

impl ConnectorConfig {
    /// Build a config for `allocation` talking to the endpoint at `server_host`
    pub fn for_allocation(
        allocation: &NetworkAllocation,
        keys: &KeyPair,
        server_public_key: &str,
        server_host: &str,
    ) -> Self {
        Self {
            private_key: keys.private_key.clone(),
            server_public_key: server_public_key.to_string(),
            server_host: server_host.to_string(),
            listen_port: allocation.listen_port,
            client_addr: allocation.client_addr,
            server_addr: allocation.server_addr,
            ..Default::default()
        }
    }

    /// Name of the local tunnel interface
    pub fn interface_name(&self) -> String {
        interface_name(Side::Connector, self.listen_port)
    }

    /// Path of the per-host interface configuration file
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface_name()))
    }

    /// `host:port` of the endpoint
    pub fn server_endpoint(&self) -> String {
        if self.server_host.contains(':') && !self.server_host.starts_with('[') {
            format!("[{}]:{}", self.server_host, self.listen_port)
        } else {
            format!("{}:{}", self.server_host, self.listen_port)
        }
    }

    /// Host routes sent through the tunnel: the endpoint address plus each
    /// routed address, never a whole subnet
    pub fn allowed_ips(&self) -> Vec<String> {
        let mut ips = vec![format!("{}/32", self.server_addr)];
        for addr in &self.routed_addrs {
            let host = addr.split_once('/').map(|(a, _)| a).unwrap_or(addr);
            let route = format!("{}/32", host);
            if !ips.contains(&route) {
                ips.push(route);
            }
        }
        ips
    }
}
