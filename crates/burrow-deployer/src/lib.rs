//! burrow-deployer: drives tunnel endpoints on remote hosts
//!
//! Connects to a host over SSH, makes the tunnel engine available, uploads
//! and supervises the `burrow-server` endpoint and keeps its heartbeat
//! fresh so the endpoint can tear itself down if this side disappears.

pub mod deployer;
pub mod engine;
pub mod heartbeat;
pub mod platform;
pub mod process;
pub mod transport;

pub use deployer::{
    DeployedEndpoint, Deployer, HealthReport, ProbeResult, RemoteLogs, ServerExit, ServerStatus,
};
pub use heartbeat::HeartbeatEmitter;
pub use process::{process_name, StopOutcome};
pub use transport::{OutputChunk, RemoteExec, ScriptedRemote, SshSession, StreamOutcome};
