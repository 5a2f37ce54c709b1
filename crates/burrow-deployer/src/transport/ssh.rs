//! SSH remote execution
//!
//! One authenticated session per deployment target. Every command gets its
//! own exec channel, so the heartbeat and a streamed server log can share
//! the session with ordinary commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use burrow_core::config::{DeployerConfig, SshAuth};
use burrow_core::error::ConnectionError;
use burrow_core::exec::{quote, CommandOutput, CommandRunner, ExecError};

use super::{upload_command, OutputChunk, RemoteExec, StreamOutcome};

/// Keepalive sent on an idle session
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSH extended-data stream number for stderr
const STDERR_STREAM: u32 = 1;

/// Raw result of one exec channel
struct RawOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: u32,
}

impl From<RawOutput> for CommandOutput {
    fn from(raw: RawOutput) -> Self {
        CommandOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
            exit_code: raw.exit_code,
        }
    }
}

/// An authenticated SSH session to one host
pub struct SshSession {
    host: String,
    handle: Handle<HostKeyCheck>,
    command_timeout: Duration,
}

impl SshSession {
    /// Connect and authenticate as described by `config`
    pub async fn connect(config: &DeployerConfig) -> Result<Self, ConnectionError> {
        let connect_err = |reason: String| ConnectionError::Connect {
            host: config.host.clone(),
            reason,
        };

        let ssh_config = Arc::new(Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        });
        let handler = HostKeyCheck {
            expected: config.host_key_fingerprint.clone(),
        };

        tracing::info!("Connecting to {}@{}", config.username, config.address());
        let mut handle = tokio::time::timeout(
            config.connect_timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| connect_err(format!("timed out after {:?}", config.connect_timeout)))?
        .map_err(|e| connect_err(format!("{:#}", e)))?;

        let authenticated = match &config.auth {
            SshAuth::Password { password } => handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| connect_err(e.to_string()))?,
            SshAuth::KeyFile { path, passphrase } => {
                let key = russh_keys::load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                    connect_err(format!("loading key {}: {}", path.display(), e))
                })?;
                handle
                    .authenticate_publickey(&config.username, Arc::new(key))
                    .await
                    .map_err(|e| connect_err(e.to_string()))?
            }
        };

        if !authenticated {
            return Err(ConnectionError::Auth {
                host: config.host.clone(),
                user: config.username.clone(),
            });
        }
        tracing::debug!("Authenticated to {}", config.host);

        Ok(Self {
            host: config.host.clone(),
            handle,
            command_timeout: config.command_timeout,
        })
    }

    async fn open(&self, command: &str) -> Result<Channel<Msg>, ExecError> {
        if self.handle.is_closed() {
            return Err(ExecError::Transport("session closed".to_string()));
        }
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Transport(format!("opening channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::Transport(format!("exec: {}", e)))?;
        Ok(channel)
    }

    async fn execute(&self, command: &str, input: Option<&[u8]>) -> Result<RawOutput, ExecError> {
        tracing::debug!("[{}] {}", self.host, command);

        let run = async {
            let mut channel = self.open(command).await?;
            if let Some(input) = input {
                channel
                    .data(input)
                    .await
                    .map_err(|e| ExecError::Transport(format!("writing stdin: {}", e)))?;
            }
            channel
                .eof()
                .await
                .map_err(|e| ExecError::Transport(format!("closing stdin: {}", e)))?;
            Ok(collect(&mut channel).await)
        };

        tokio::time::timeout(self.command_timeout, run)
            .await
            .map_err(|_| ExecError::Timeout {
                command: command.to_string(),
                after: self.command_timeout,
            })?
    }
}

async fn collect(channel: &mut Channel<Msg>) -> RawOutput {
    let mut out = RawOutput {
        stdout: Vec::new(),
        stderr: Vec::new(),
        exit_code: 0,
    };
    let mut status = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => out.stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR_STREAM => {
                out.stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                out.stderr
                    .extend_from_slice(format!("killed by signal {:?}\n", signal_name).as_bytes());
                status.get_or_insert(128);
            }
            _ => {}
        }
    }

    // A channel that closes without a status was torn down under us
    out.exit_code = status.unwrap_or(255);
    out
}

#[async_trait]
impl CommandRunner for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.execute(command, None).await.map(Into::into)
    }

    async fn run_with_input(
        &self,
        command: &str,
        input: &[u8],
    ) -> Result<CommandOutput, ExecError> {
        self.execute(command, Some(input)).await.map(Into::into)
    }
}

#[async_trait]
impl RemoteExec for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_streaming(
        &self,
        command: &str,
        sink: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome, ExecError> {
        tracing::debug!("[{}] streaming: {}", self.host, command);
        let mut channel = self.open(command).await?;
        let mut status = None;

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => None,
                msg = channel.wait() => Some(msg),
            };
            let msg = match msg {
                None => {
                    if let Err(e) = channel.close().await {
                        tracing::debug!("Closing streamed channel: {}", e);
                    }
                    return Ok(StreamOutcome::Cancelled);
                }
                Some(None) => break,
                Some(Some(msg)) => msg,
            };

            let chunk = match msg {
                ChannelMsg::Data { ref data } => OutputChunk::Stdout(Bytes::copy_from_slice(data)),
                ChannelMsg::ExtendedData { ref data, .. } => {
                    OutputChunk::Stderr(Bytes::copy_from_slice(data))
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    status = Some(exit_status);
                    continue;
                }
                _ => continue,
            };
            if sink.send(chunk).await.is_err() {
                tracing::debug!("Output receiver dropped; discarding further output");
            }
        }

        Ok(StreamOutcome::Exited(status.unwrap_or(255)))
    }

    async fn upload(&self, data: &[u8], remote_path: &str, mode: u32) -> Result<(), ExecError> {
        let command = upload_command(remote_path, mode);
        tracing::debug!("[{}] upload {} bytes to {}", self.host, data.len(), remote_path);
        let out: CommandOutput = self.execute(&command, Some(data)).await?.into();
        out.into_result(&command).map(|_| ())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, ExecError> {
        let command = format!("cat {}", quote(remote_path));
        let raw = self.execute(&command, None).await?;
        if raw.exit_code != 0 {
            return Err(ExecError::Failed {
                command,
                exit_code: raw.exit_code,
                stderr: String::from_utf8_lossy(&raw.stderr).trim().to_string(),
            });
        }
        Ok(raw.stdout)
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))
    }
}

/// Verifies the host key against a configured fingerprint
struct HostKeyCheck {
    expected: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: {}", fingerprint);

        match &self.expected {
            Some(expected) if expected.trim_start_matches("SHA256:") == fingerprint => {
                tracing::debug!("Host key verified against configured fingerprint");
                Ok(true)
            }
            Some(expected) => Err(anyhow::anyhow!(
                "host key mismatch: expected {}, got SHA256:{}",
                expected,
                fingerprint
            )),
            None => {
                tracing::warn!(
                    "No host key fingerprint configured; accepting SHA256:{}",
                    fingerprint
                );
                Ok(true)
            }
        }
    }
}
