//! Remote execution capability
//!
//! The deployer only needs five things from a remote host: run a command,
//! stream a long-running one, upload bytes, download bytes and tell whether
//! the session is still open. [`RemoteExec`] captures exactly that, so the
//! orchestration logic runs unchanged over SSH ([`SshSession`]) or a script
//! ([`ScriptedRemote`]).

mod ssh;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use burrow_core::exec::{quote, CommandOutput, CommandRunner, ExecError, RecordingRunner};

pub use ssh::SshSession;

/// A piece of output from a streamed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl OutputChunk {
    pub fn bytes(&self) -> &Bytes {
        match self {
            OutputChunk::Stdout(b) | OutputChunk::Stderr(b) => b,
        }
    }
}

/// How a streamed command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The command exited with this status
    Exited(u32),
    /// The caller cancelled and the channel was closed
    Cancelled,
}

/// A session on one remote host
#[async_trait]
pub trait RemoteExec: CommandRunner {
    /// Host this session talks to, for error context
    fn host(&self) -> &str;

    /// Run `command`, forwarding its output to `sink` until it exits or
    /// `cancel` fires
    async fn run_streaming(
        &self,
        command: &str,
        sink: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome, ExecError>;

    /// Write `data` to `remote_path` with permission bits `mode`
    ///
    /// The file is replaced atomically, so uploading over a binary that is
    /// still mapped by a dying process succeeds.
    async fn upload(&self, data: &[u8], remote_path: &str, mode: u32) -> Result<(), ExecError>;

    /// Read the whole of `remote_path`
    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, ExecError>;

    /// Whether the underlying session has gone away
    fn is_closed(&self) -> bool;

    /// Close the session
    async fn close(&self) -> Result<(), ExecError>;
}

/// Shell line that atomically installs stdin at `path`
pub(crate) fn upload_command(path: &str, mode: u32) -> String {
    let tmp = format!("{}.upload", path);
    format!(
        "cat > {tmp} && chmod {mode:o} {tmp} && mv -f {tmp} {path}",
        tmp = quote(&tmp),
        mode = mode,
        path = quote(path)
    )
}

/// Runs commands over a [`RemoteExec`], feeding the sudo password to any
/// command that asks for it on stdin
///
/// Install strategies and process control take a plain [`CommandRunner`];
/// this adapter lets them escalate with a password without it ever
/// appearing on a command line.
pub struct SudoRunner {
    exec: Arc<dyn RemoteExec>,
    password: Option<String>,
}

impl SudoRunner {
    pub fn new(exec: Arc<dyn RemoteExec>, password: Option<String>) -> Self {
        Self { exec, password }
    }
}

#[async_trait]
impl CommandRunner for SudoRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        match &self.password {
            Some(password) if command.contains("sudo -S") => {
                let input = format!("{}\n", password);
                self.exec.run_with_input(command, input.as_bytes()).await
            }
            _ => self.exec.run(command).await,
        }
    }

    async fn run_with_input(
        &self,
        command: &str,
        input: &[u8],
    ) -> Result<CommandOutput, ExecError> {
        self.exec.run_with_input(command, input).await
    }
}

/// A [`RemoteExec`] that executes nothing
///
/// Commands are answered by a [`RecordingRunner`] script and uploads land in
/// memory. Backs dry runs and tests.
pub struct ScriptedRemote {
    host: String,
    runner: RecordingRunner,
    files: Mutex<HashMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl ScriptedRemote {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            runner: RecordingRunner::new(),
            files: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The script answering commands
    pub fn runner(&self) -> &RecordingRunner {
        &self.runner
    }

    /// Every command and transfer seen so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.runner.commands()
    }

    /// Contents uploaded to `path`, if any
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Seed a remote file for `download`
    pub fn put_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), contents.into());
    }

    fn ensure_open(&self) -> Result<(), ExecError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecError::Transport("session closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRemote {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.ensure_open()?;
        self.runner.run(command).await
    }

    async fn run_with_input(
        &self,
        command: &str,
        input: &[u8],
    ) -> Result<CommandOutput, ExecError> {
        self.ensure_open()?;
        self.runner.run_with_input(command, input).await
    }
}

#[async_trait]
impl RemoteExec for ScriptedRemote {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_streaming(
        &self,
        command: &str,
        sink: mpsc::Sender<OutputChunk>,
        _cancel: CancellationToken,
    ) -> Result<StreamOutcome, ExecError> {
        let out = self.run(command).await?;
        if !out.stdout.is_empty() {
            let _ = sink.send(OutputChunk::Stdout(Bytes::from(out.stdout))).await;
        }
        if !out.stderr.is_empty() {
            let _ = sink.send(OutputChunk::Stderr(Bytes::from(out.stderr))).await;
        }
        Ok(StreamOutcome::Exited(out.exit_code))
    }

    async fn upload(&self, data: &[u8], remote_path: &str, mode: u32) -> Result<(), ExecError> {
        self.ensure_open()?;
        self.runner
            .run(&format!("# upload {} bytes to {} (mode {:o})", data.len(), remote_path, mode))
            .await?;
        self.put_file(remote_path, data.to_vec());
        Ok(())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, ExecError> {
        self.ensure_open()?;
        self.runner
            .run(&format!("# download {}", remote_path))
            .await?;
        self.file(remote_path).ok_or_else(|| ExecError::Failed {
            command: format!("cat {}", quote(remote_path)),
            exit_code: 1,
            stderr: format!("{}: No such file or directory", remote_path),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
