//! Local tunnel connector
//!
//! Materialises the interface configuration for one endpoint and brings the
//! local interface up and down with `wg-quick`. Privileged commands get
//! their credential non-interactively: either the process is already root,
//! sudo needs no password, or the password is fed to `sudo -S` on stdin.

use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use burrow_core::command::{NetCommand, Privilege};
use burrow_core::config::{write_private, ConnectorConfig};
use burrow_core::exec::{CommandOutput, CommandRunner, ExecError};
use burrow_core::keys;
use burrow_core::time::current_time_secs;

use crate::error::ConnectorError;
use crate::probe;
use crate::quickconf;
use crate::stats::{parse_transfer, ConnectionState, ConnectionStats};

/// Shortest cadence [`LocalConnector::monitor`] samples at
const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// How privileged commands are authorised
#[derive(Clone, Default)]
pub enum Credential {
    /// This process already runs as root
    #[default]
    Root,
    /// sudo without a password
    Sudo,
    /// sudo with a password supplied on stdin
    SudoPassword(String),
}

impl Credential {
    fn privilege(&self) -> Privilege {
        match self {
            Credential::Root => Privilege::Root,
            Credential::Sudo => Privilege::Sudo,
            Credential::SudoPassword(_) => Privilege::SudoWithPassword,
        }
    }

    fn password(&self) -> Option<&str> {
        match self {
            Credential::SudoPassword(p) => Some(p),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Root => f.write_str("Root"),
            Credential::Sudo => f.write_str("Sudo"),
            Credential::SudoPassword(_) => f.write_str("SudoPassword([REDACTED])"),
        }
    }
}

struct Inner {
    config: ConnectorConfig,
    runner: Arc<dyn CommandRunner>,
    state: watch::Sender<ConnectionState>,
    /// Credential of the active connection, reused for queries
    credential: StdMutex<Option<Credential>>,
    /// Serialises connect and disconnect
    ops: Mutex<()>,
}

/// The local side of one tunnel
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct LocalConnector {
    inner: Arc<Inner>,
}

impl LocalConnector {
    pub fn new(config: ConnectorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                state,
                credential: StdMutex::new(None),
                ops: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn interface_name(&self) -> String {
        self.inner.config.interface_name()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().connected
    }

    /// Watch connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    async fn run_privileged(
        &self,
        command: &NetCommand,
        credential: &Credential,
    ) -> Result<CommandOutput, ExecError> {
        let line = credential.privilege().wrap_command(command);
        match credential.password() {
            Some(password) => {
                let input = format!("{}\n", password);
                self.inner.runner.run_with_input(&line, input.as_bytes()).await
            }
            None => self.inner.runner.run(&line).await,
        }
    }

    /// Bring the tunnel up
    pub async fn connect(&self, credential: &Credential) -> Result<(), ConnectorError> {
        let _guard = self.inner.ops.lock().await;
        if self.is_connected() {
            return Err(ConnectorError::AlreadyConnected);
        }

        let config = &self.inner.config;
        keys::validate(&config.private_key)?;
        keys::validate(&config.server_public_key)?;

        let iface = config.interface_name();
        let path = config.config_path();
        write_private(&path, &quickconf::render(config)).await?;
        tracing::debug!("Wrote {:?}", path);

        // A crashed run may have left the interface behind
        let delete = NetCommand::DeleteInterface { name: iface.clone() };
        let out = self.run_privileged(&delete, credential).await?;
        if out.success() {
            tracing::info!("Removed stale interface {}", iface);
        } else if delete.is_already_absent(&out.stderr) {
            tracing::debug!("No stale interface {}", iface);
        } else {
            tracing::warn!("Could not remove stale {}: {}", iface, out.stderr.trim());
        }

        let up = NetCommand::QuickUp {
            path: path.to_string_lossy().into_owned(),
        };
        let out = self.run_privileged(&up, credential).await?;
        if !out.success() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!("Removing {:?}: {}", path, e);
            }
            return Err(ConnectorError::Interface {
                interface: iface,
                detail: out.stderr.trim().to_string(),
            });
        }

        *self
            .inner
            .credential
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        self.inner.state.send_replace(ConnectionState {
            connected: true,
            connected_at: Some(current_time_secs()),
            bytes_sent: 0,
            bytes_received: 0,
        });
        tracing::info!(
            "Tunnel {} up to {} ({})",
            iface,
            config.server_endpoint(),
            config.allowed_ips().join(", ")
        );

        tokio::time::sleep(config.settle_delay).await;
        Ok(())
    }

    /// Bring the tunnel down and delete its configuration file
    ///
    /// A failing `wg-quick down` is logged; the connection is cleared
    /// regardless.
    pub async fn disconnect(&self, credential: &Credential) -> Result<(), ConnectorError> {
        let _guard = self.inner.ops.lock().await;
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }

        let config = &self.inner.config;
        let path = config.config_path();
        let down = NetCommand::QuickDown {
            path: path.to_string_lossy().into_owned(),
        };
        match self.run_privileged(&down, credential).await {
            Ok(out) if out.success() => {}
            Ok(out) if down.is_already_absent(&out.stderr) => {
                tracing::debug!("{} was already down", config.interface_name());
            }
            Ok(out) => tracing::warn!("wg-quick down failed: {}", out.stderr.trim()),
            Err(e) => tracing::warn!("wg-quick down failed: {}", e),
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Removing {:?}: {}", path, e),
        }

        *self
            .inner
            .credential
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        self.inner.state.send_replace(ConnectionState::default());
        tracing::info!("Tunnel {} down", config.interface_name());
        Ok(())
    }

    fn active_credential(&self) -> Result<Credential, ConnectorError> {
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.inner
            .credential
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ConnectorError::NotConnected)
    }

    /// Sample transfer counters from the interface
    pub async fn stats(&self) -> Result<ConnectionStats, ConnectorError> {
        let credential = self.active_credential()?;
        let iface = self.interface_name();
        let show = NetCommand::ShowTransfer { name: iface.clone() };
        let out = self.run_privileged(&show, &credential).await?;
        if !out.success() {
            return Err(ConnectorError::Interface {
                interface: iface,
                detail: out.stderr.trim().to_string(),
            });
        }

        let (received, sent) = parse_transfer(&out.stdout);
        self.inner.state.send_if_modified(|state| {
            if !state.connected {
                return false;
            }
            state.bytes_received = received;
            state.bytes_sent = sent;
            true
        });
        Ok(ConnectionStats::from_state(&self.state()))
    }

    /// Stream statistics every `interval` while connected
    ///
    /// The first sample is immediate. The stream ends when `cancel` fires or
    /// the tunnel goes down; a failed sample repeats the last known counters.
    /// Each call returns a fresh, independent stream. Intervals shorter than
    /// 10ms, including zero, are raised to 10ms.
    pub fn monitor(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ConnectionStats> + Send + 'static {
        let mut ticker = tokio::time::interval(interval.max(MIN_MONITOR_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let state = self.subscribe();

        stream::unfold(
            (self.clone(), ticker, state, cancel),
            |(connector, mut ticker, mut state, cancel)| async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = state.wait_for(|s| !s.connected) => return None,
                    _ = ticker.tick() => {}
                }
                if !state.borrow().connected {
                    return None;
                }

                let sample = match connector.stats().await {
                    Ok(sample) => sample,
                    Err(ConnectorError::NotConnected) => return None,
                    Err(e) => {
                        tracing::debug!("Stats sample failed: {}", e);
                        ConnectionStats::from_state(&connector.state())
                    }
                };
                Some((sample, (connector, ticker, state, cancel)))
            },
        )
    }

    /// Ping `addr` through the tunnel
    pub async fn ping(&self, addr: &str, timeout: Duration) -> Result<Duration, ConnectorError> {
        self.active_credential()?;
        probe::ping(self.inner.runner.as_ref(), addr, timeout).await
    }

    /// Open a TCP connection to `addr` (`host:port`) through the tunnel
    pub async fn dial_tcp(&self, addr: &str, timeout: Duration) -> Result<Duration, ConnectorError> {
        self.active_credential()?;
        probe::dial_tcp(addr, timeout).await
    }

    /// Resolve `host` while the tunnel is up
    pub async fn resolve(&self, host: &str, timeout: Duration) -> Result<Vec<IpAddr>, ConnectorError> {
        self.active_credential()?;
        probe::resolve(host, timeout).await
    }
}
