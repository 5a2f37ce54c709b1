//! Local side of a burrow tunnel
//!
//! [`LocalConnector`] writes the interface configuration for one endpoint,
//! brings the interface up with `wg-quick`, samples transfer statistics and
//! runs reachability probes through the tunnel.

pub mod connector;
pub mod error;
pub mod probe;
pub mod quickconf;
pub mod stats;

pub use connector::{Credential, LocalConnector};
pub use error::ConnectorError;
pub use stats::{ConnectionState, ConnectionStats};
