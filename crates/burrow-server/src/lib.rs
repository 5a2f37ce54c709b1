//! burrow-server: the tunnel endpoint
//!
//! Runs on the remote host, owns one tunnel interface and its forwarding
//! rules, and tears itself down when the controller's heartbeat goes stale.

pub mod conf;
pub mod endpoint;
pub mod engine;
pub mod firewall;
pub mod peers;
pub mod watchdog;

pub use endpoint::{EndpointOptions, ShutdownReason, TunnelEndpoint};
pub use engine::EngineLauncher;
pub use peers::{PeerSession, PeerTable};
