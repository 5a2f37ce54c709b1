//! Connector errors

use thiserror::Error;

use burrow_core::error::KeyError;
use burrow_core::exec::ExecError;

/// Errors from the local tunnel connector
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The operation needs an active tunnel
    #[error("not connected")]
    NotConnected,

    /// connect() on an active tunnel
    #[error("already connected")]
    AlreadyConnected,

    /// Bringing the interface up or querying it failed
    #[error("interface {interface}: {detail}")]
    Interface { interface: String, detail: String },

    /// A diagnostic probe failed or timed out
    #[error("probe {target} failed: {detail}")]
    Probe { target: String, detail: String },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
