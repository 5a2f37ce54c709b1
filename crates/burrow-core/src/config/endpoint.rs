//! Tunnel endpoint configuration
//!
//! Rendered by the deployer, uploaded next to the endpoint binary and loaded
//! by `burrow-server --config`. Immutable once the endpoint starts.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::keys::{self, KeyPair};
use crate::liveness::{HEARTBEAT_FILE_NAME, STALE_AFTER};
use crate::network::{interface_name, NetworkAllocation, Side, BASE_PORT};
use crate::types::EngineKind;

/// Log file name inside the endpoint work directory
pub const ENGINE_LOG_NAME: &str = "engine.log";

/// A peer registered when the endpoint starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub public_key: String,
    pub client_addr: Ipv4Addr,
    #[serde(default)]
    pub allowed_subnets: Vec<String>,
}

/// Configuration for one tunnel endpoint
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint private key (base64)
    pub private_key: String,

    /// Endpoint public key (base64), handed to connectors
    pub public_key: String,

    /// UDP listen port
    pub listen_port: u16,

    /// Endpoint address inside the tunnel subnet
    pub server_addr: Ipv4Addr,

    /// Tunnel subnet in CIDR form
    pub vpn_subnet: String,

    /// Private addresses behind the endpoint that connectors may reach
    pub routed_addrs: Vec<String>,

    /// Interface tunnel traffic is forwarded and masqueraded through.
    /// No forwarding or NAT is configured when unset.
    pub egress_interface: Option<String>,

    /// Per-port work directory holding config, PID, log and heartbeat
    pub work_dir: PathBuf,

    /// Liveness file written by the controller; the watchdog is disabled
    /// when unset
    pub heartbeat_file: Option<PathBuf>,

    /// Heartbeat age beyond which the endpoint tears itself down
    #[serde(with = "duration_secs")]
    pub stale_after: Duration,

    /// Engine log path; defaults to `<work_dir>/engine.log`
    pub log_file: Option<PathBuf>,

    /// Persistent keepalive sent to peers, in seconds
    pub keepalive: Option<u16>,

    /// How the engine is provided; probed at start when unset
    pub engine: Option<EngineKind>,

    /// Peers registered at start
    pub peers: Vec<PeerConfig>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        let work_dir = PathBuf::from("/tmp/burrow").join(BASE_PORT.to_string());
        Self {
            private_key: String::new(),
            public_key: String::new(),
            listen_port: BASE_PORT,
            server_addr: Ipv4Addr::new(10, 99, 0, 1),
            vpn_subnet: "10.99.0.0/24".to_string(),
            routed_addrs: vec![],
            egress_interface: None,
            heartbeat_file: Some(work_dir.join(HEARTBEAT_FILE_NAME)),
            work_dir,
            stale_after: STALE_AFTER,
            log_file: None,
            keepalive: Some(25),
            engine: None,
            peers: vec![],
        }
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("public_key", &self.public_key)
            .field("listen_port", &self.listen_port)
            .field("server_addr", &self.server_addr)
            .field("vpn_subnet", &self.vpn_subnet)
            .field("routed_addrs", &self.routed_addrs)
            .field("egress_interface", &self.egress_interface)
            .field("work_dir", &self.work_dir)
            .field("heartbeat_file", &self.heartbeat_file)
            .field("engine", &self.engine)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl EndpointConfig {
    /// Build a config for `allocation` rooted under `base_dir`
    pub fn for_allocation(
        allocation: &NetworkAllocation,
        keys: &KeyPair,
        base_dir: &str,
    ) -> Self {
        let work_dir = PathBuf::from(crate::network::work_dir_for_port(
            base_dir,
            allocation.listen_port,
        ));
        Self {
            private_key: keys.private_key.clone(),
            public_key: keys.public_key.clone(),
            listen_port: allocation.listen_port,
            server_addr: allocation.server_addr,
            vpn_subnet: allocation.subnet.clone(),
            heartbeat_file: Some(work_dir.join(HEARTBEAT_FILE_NAME)),
            work_dir,
            ..Default::default()
        }
    }

    /// Name of the endpoint's tunnel interface
    pub fn interface_name(&self) -> String {
        interface_name(Side::Endpoint, self.listen_port)
    }

    /// Server address with the subnet's prefix length
    pub fn server_cidr(&self) -> String {
        let prefix = self
            .vpn_subnet
            .split_once('/')
            .map(|(_, p)| p)
            .unwrap_or("24");
        format!("{}/{}", self.server_addr, prefix)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join(ENGINE_LOG_NAME))
    }

    /// Path of the generated engine configuration file
    pub fn engine_conf_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.conf", self.interface_name()))
    }

    /// Check the fields the endpoint cannot start without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.private_key.is_empty() {
            return Err(ConfigError::MissingField("private_key".to_string()));
        }
        keys::validate(&self.private_key)
            .map_err(|e| ConfigError::Invalid(format!("private_key: {}", e)))?;
        if !self.public_key.is_empty() {
            let derived = keys::derive_public(&self.private_key)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if derived != self.public_key.trim() {
                return Err(ConfigError::Invalid(
                    "public_key does not match private_key".to_string(),
                ));
            }
        }
        if self.listen_port == 0 {
            return Err(ConfigError::Invalid("listen_port must be non-zero".to_string()));
        }
        if !self.vpn_subnet.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "vpn_subnet must be in CIDR form, got {:?}",
                self.vpn_subnet
            )));
        }
        for peer in &self.peers {
            keys::validate(&peer.public_key)
                .map_err(|e| ConfigError::Invalid(format!("peer {}: {}", peer.client_addr, e)))?;
        }
        Ok(())
    }
}
