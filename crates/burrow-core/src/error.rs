//! Core error types for burrow

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::exec::ExecError;

/// Top-level error type for the burrow ecosystem
#[derive(Error, Debug)]
pub enum BurrowError {
    /// Remote session error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Deployment error
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),

    /// Endpoint error
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    /// Key or allocation error
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Command execution error
    #[error("Command error: {0}")]
    Exec(#[from] ExecError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote session errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The remote host rejected our credentials
    #[error("Authentication failed for {user}@{host}")]
    Auth { host: String, user: String },

    /// The remote host could not be reached
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    /// An operation needed a session but none is open
    #[error("No remote session is open; call connect() first")]
    NotConnected,

    /// The session was closed underneath us
    #[error("Remote session closed")]
    SessionClosed,
}

/// Deployment and remote process management errors
#[derive(Error, Debug)]
pub enum DeployError {
    /// Every install strategy failed
    #[error("Tunnel engine unavailable on {host}; tried: {}", attempts.join("; "))]
    DependencyUnavailable { host: String, attempts: Vec<String> },

    /// A deployment step failed
    #[error("Deployment to {host} failed during {step}: {detail}")]
    Deployment {
        host: String,
        step: String,
        detail: String,
    },

    /// No usable privilege escalation path
    #[error("Insufficient privileges on {host}.\n\n{remediation}")]
    Privilege { host: String, remediation: String },

    /// A bounded wait expired
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// The remote platform has no endpoint build
    #[error("Unsupported remote platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
}

/// Tunnel endpoint errors
#[derive(Error, Debug)]
pub enum EndpointError {
    /// start() on a running endpoint
    #[error("Endpoint is already running")]
    AlreadyRunning,

    /// Operation requires a running endpoint
    #[error("Endpoint is not running")]
    NotRunning,

    /// Peer public key already registered
    #[error("Peer already registered: {0}")]
    DuplicatePeer(String),

    /// Peer public key not registered
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// The tunnel engine could not be started or configured
    #[error("Tunnel engine error: {0}")]
    Engine(String),
}

/// Key and network allocation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// Key text does not decode to exactly 32 bytes
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Client identifier outside the allocatable range
    #[error("Client id {0} out of range (expected 1..=254)")]
    OutOfRange(u32),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Convenience alias used across the workspace
pub type Result<T, E = BurrowError> = std::result::Result<T, E>;
