//! burrow-core: shared building blocks for burrow tunnels
//!
//! Key handling, deterministic network allocation, the typed network command
//! set, the command-runner seam, tunnel engine install strategies, the
//! liveness-file protocol and configuration used by the endpoint, the
//! deployer, the connector and the CLI.

pub mod command;
pub mod config;
pub mod error;
pub mod exec;
pub mod install;
pub mod keys;
pub mod liveness;
pub mod network;
pub mod pidfile;
pub mod time;
pub mod types;

pub use command::{ForwardRule, NetCommand, Privilege};
pub use error::{BurrowError, ConfigError, ConnectionError, DeployError, EndpointError, KeyError};
pub use exec::{CommandOutput, CommandRunner, ExecError, LocalRunner, RecordingRunner};
pub use keys::KeyPair;
pub use network::{allocate_network, NetworkAllocation};
pub use types::{EndpointState, EngineKind, Platform};
