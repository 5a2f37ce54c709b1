//! Deterministic network allocation
//!
//! A small client identifier maps to a private /24, the server and client
//! addresses inside it, and a listen port. Distinct identifiers never share
//! a subnet or a port, so many tunnels can coexist on the same hosts.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// First port handed out; client `n` listens on `BASE_PORT + n`
pub const BASE_PORT: u16 = 51820;

/// Lowest allocatable client identifier
pub const MIN_CLIENT_ID: u32 = 1;

/// Highest allocatable client identifier
pub const MAX_CLIENT_ID: u32 = 254;

/// Addresses and port derived from a client identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAllocation {
    /// The identifier this allocation was derived from
    pub client_id: u8,
    /// Tunnel subnet in CIDR form, e.g. `10.99.1.0/24`
    pub subnet: String,
    /// Endpoint address inside the subnet (`.1`)
    pub server_addr: Ipv4Addr,
    /// Local connector address inside the subnet (`.2`)
    pub client_addr: Ipv4Addr,
    /// UDP listen port of the endpoint
    pub listen_port: u16,
}

impl NetworkAllocation {
    /// Server address with the subnet prefix, for interface configuration
    pub fn server_cidr(&self) -> String {
        format!("{}/24", self.server_addr)
    }

    /// Client address with the subnet prefix, for interface configuration
    pub fn client_cidr(&self) -> String {
        format!("{}/24", self.client_addr)
    }
}

/// Derive the network allocation for `client_id`
///
/// Fails with [`KeyError::OutOfRange`] outside `1..=254`.
pub fn allocate_network(client_id: u32) -> Result<NetworkAllocation, KeyError> {
    if !(MIN_CLIENT_ID..=MAX_CLIENT_ID).contains(&client_id) {
        return Err(KeyError::OutOfRange(client_id));
    }
    let id = client_id as u8;

    Ok(NetworkAllocation {
        client_id: id,
        subnet: format!("10.99.{}.0/24", id),
        server_addr: Ipv4Addr::new(10, 99, id, 1),
        client_addr: Ipv4Addr::new(10, 99, id, 2),
        listen_port: BASE_PORT + u16::from(id),
    })
}

/// Which side of the tunnel owns an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The remote tunnel endpoint
    Endpoint,
    /// The local connector
    Connector,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Endpoint => write!(f, "endpoint"),
            Side::Connector => write!(f, "connector"),
        }
    }
}

/// Interface name for a tunnel listening on `listen_port`
///
/// The suffix is `listen_port % 100`, so ports exactly 100 apart map to the
/// same name. Allocated ports span 51821..=52074 and can therefore collide
/// (e.g. 51821 and 51921).
pub fn interface_name(side: Side, listen_port: u16) -> String {
    let prefix = match side {
        Side::Endpoint => "bws",
        Side::Connector => "bwc",
    };
    format!("{}{}", prefix, listen_port % 100)
}

/// Per-tunnel remote work directory under `base`
pub fn work_dir_for_port(base: &str, listen_port: u16) -> String {
    format!("{}/{}", base.trim_end_matches('/'), listen_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocate_first_client() {
        let alloc = allocate_network(1).unwrap();
        assert_eq!(alloc.subnet, "10.99.1.0/24");
        assert_eq!(alloc.server_addr, Ipv4Addr::new(10, 99, 1, 1));
        assert_eq!(alloc.client_addr, Ipv4Addr::new(10, 99, 1, 2));
        assert_eq!(alloc.listen_port, 51821);
    }

    #[test]
    fn test_allocate_last_client() {
        let alloc = allocate_network(254).unwrap();
        assert_eq!(alloc.subnet, "10.99.254.0/24");
        assert_eq!(alloc.listen_port, 52074);
    }

    #[test]
    fn test_allocate_out_of_range() {
        assert_eq!(allocate_network(0), Err(KeyError::OutOfRange(0)));
        assert_eq!(allocate_network(255), Err(KeyError::OutOfRange(255)));
        assert_eq!(allocate_network(u32::MAX), Err(KeyError::OutOfRange(u32::MAX)));
    }

    #[test]
    fn test_allocations_never_collide() {
        let mut subnets = HashSet::new();
        let mut ports = HashSet::new();
        for id in MIN_CLIENT_ID..=MAX_CLIENT_ID {
            let alloc = allocate_network(id).unwrap();
            assert!(subnets.insert(alloc.subnet));
            assert!(ports.insert(alloc.listen_port));
        }
        assert_eq!(subnets.len(), 254);
    }

    #[test]
    fn test_allocation_is_deterministic() {
        assert_eq!(allocate_network(42).unwrap(), allocate_network(42).unwrap());
    }

    #[test]
    fn test_cidr_helpers() {
        let alloc = allocate_network(7).unwrap();
        assert_eq!(alloc.server_cidr(), "10.99.7.1/24");
        assert_eq!(alloc.client_cidr(), "10.99.7.2/24");
    }

    #[test]
    fn test_interface_name_uses_port_modulo() {
        assert_eq!(interface_name(Side::Endpoint, 51821), "bws21");
        assert_eq!(interface_name(Side::Connector, 51821), "bwc21");
        // Known collision for ports 100 apart
        assert_eq!(
            interface_name(Side::Endpoint, 51821),
            interface_name(Side::Endpoint, 51921)
        );
    }

    #[test]
    fn test_work_dir_for_port() {
        assert_eq!(work_dir_for_port("/tmp/burrow/", 51821), "/tmp/burrow/51821");
    }
}
