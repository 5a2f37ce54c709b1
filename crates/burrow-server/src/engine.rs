//! Userspace tunnel engine supervision
//!
//! The engine runs as a child process with stdout and stderr tee'd into an
//! append-only log. A watcher task owns the child: it reports an exit nobody
//! asked for, and on cancellation it force-kills the child and closes the log.
//! Once a stop has begun, an exit is expected even before the kill: a
//! userspace engine quits by itself as soon as its interface is deleted.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use burrow_core::error::EndpointError;

/// PID file for the engine subprocess inside the work directory
pub const ENGINE_PID_FILE_NAME: &str = "engine.pid";

/// How long `shutdown` waits for the watcher to reap the child
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Program and arguments that start the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EngineLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run `binary` in the foreground, creating `interface`
    pub fn userspace(binary: &Path, interface: &str) -> Self {
        Self::new(binary, vec!["-f".to_string(), interface.to_string()])
    }
}

/// Invoked with the exit code when the engine exits without being asked to
pub type ExitCallback = Box<dyn FnOnce(Option<i32>) + Send + 'static>;

/// A running, watched engine subprocess
pub struct SupervisedEngine {
    pid: Option<u32>,
    stopping: CancellationToken,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl SupervisedEngine {
    /// Spawn the engine and start watching it
    pub async fn spawn(
        launcher: &EngineLauncher,
        log_path: &Path,
        on_unexpected_exit: ExitCallback,
    ) -> Result<Self, EndpointError> {
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EndpointError::Engine(format!("creating log dir: {}", e)))?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
            .map_err(|e| EndpointError::Engine(format!("opening {:?}: {}", log_path, e)))?;
        let log = Arc::new(Mutex::new(log));

        let mut child = Command::new(&launcher.program)
            .args(&launcher.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EndpointError::Engine(format!(
                    "failed to launch {}: {}",
                    launcher.program.display(),
                    e
                ))
            })?;

        let pid = child.id();
        tracing::info!("Engine {} started (pid {:?})", launcher.program.display(), pid);

        let mut tees = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            tees.push(tokio::spawn(tee(stdout, Arc::clone(&log), "stdout")));
        }
        if let Some(stderr) = child.stderr.take() {
            tees.push(tokio::spawn(tee(stderr, Arc::clone(&log), "stderr")));
        }

        let stopping = CancellationToken::new();
        let expected = stopping.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let watcher = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = token.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!("Engine already gone: {}", e);
                    }
                    child.wait().await
                }
            };

            for handle in tees {
                let _ = handle.await;
            }
            if let Err(e) = log.lock().await.flush().await {
                tracing::warn!("Failed to flush engine log: {}", e);
            }

            let code = status.as_ref().ok().and_then(|s| s.code());
            if token.is_cancelled() || expected.is_cancelled() {
                tracing::debug!("Engine stopped (exit code {:?})", code);
            } else {
                tracing::error!("Engine exited unexpectedly (exit code {:?})", code);
                on_unexpected_exit(code);
            }
        });

        Ok(Self {
            pid,
            stopping,
            cancel,
            watcher,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the watcher has already seen the engine exit
    pub fn has_exited(&self) -> bool {
        self.watcher.is_finished()
    }

    /// Treat any exit from now on as requested
    pub fn mark_stopping(&self) {
        self.stopping.cancel();
    }

    /// Cancel the watcher, force-kill the engine if alive and close the log
    pub async fn shutdown(self) {
        self.stopping.cancel();
        self.cancel.cancel();
        match tokio::time::timeout(REAP_TIMEOUT, self.watcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Engine watcher failed: {}", e),
            Err(_) => tracing::warn!("Engine did not exit within {:?}", REAP_TIMEOUT),
        }
    }
}

async fn tee<R>(stream: R, log: Arc<Mutex<File>>, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "burrow_server::engine", "[{}] {}", name, line);
                let mut log = log.lock().await;
                if let Err(e) = log.write_all(format!("{}\n", line).as_bytes()).await {
                    tracing::warn!("Failed to write engine log: {}", e);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Engine {} closed: {}", name, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn sh(script: &str) -> EngineLauncher {
        EngineLauncher::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_userspace_launcher() {
        let l = EngineLauncher::userspace(Path::new("/usr/bin/wireguard-go"), "bws21");
        assert_eq!(l.args, vec!["-f", "bws21"]);
    }

    #[tokio::test]
    async fn test_output_is_tee_d_to_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("engine.log");
        let (tx, rx) = oneshot::channel();

        let _engine = SupervisedEngine::spawn(
            &sh("echo ready; echo warn >&2; exit 0"),
            &log,
            Box::new(move |code| {
                let _ = tx.send(code);
            }),
        )
        .await
        .unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, Some(0));

        let contents = tokio::fs::read_to_string(&log).await.unwrap();
        assert!(contents.contains("ready"));
        assert!(contents.contains("warn"));
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_reported() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = oneshot::channel();

        let _engine = SupervisedEngine::spawn(
            &sh("exit 3"),
            &dir.path().join("engine.log"),
            Box::new(move |code| {
                let _ = tx.send(code);
            }),
        )
        .await
        .unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_shutdown_is_not_reported_as_unexpected() {
        let dir = TempDir::new().unwrap();
        let reported = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reported);

        let engine = SupervisedEngine::spawn(
            &EngineLauncher::new("sleep", vec!["30".to_string()]),
            &dir.path().join("engine.log"),
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
        )
        .await
        .unwrap();

        let pid = engine.pid().unwrap();
        assert!(burrow_core::pidfile::is_process_alive(pid));

        engine.shutdown().await;
        assert!(!reported.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_exit_after_mark_stopping_is_expected() {
        let dir = TempDir::new().unwrap();
        let reported = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reported);

        let engine = SupervisedEngine::spawn(
            &EngineLauncher::new("sleep", vec!["30".to_string()]),
            &dir.path().join("engine.log"),
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
        )
        .await
        .unwrap();

        // The engine dies on its own while a stop is under way
        engine.mark_stopping();
        let pid = engine.pid().unwrap();
        burrow_core::pidfile::terminate(pid).unwrap();
        for _ in 0..100 {
            if engine.has_exited() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(engine.has_exited());
        assert!(!reported.load(Ordering::SeqCst));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let dir = TempDir::new().unwrap();
        let result = SupervisedEngine::spawn(
            &EngineLauncher::new("/nonexistent/engine", vec![]),
            &dir.path().join("engine.log"),
            Box::new(|_| {}),
        )
        .await;
        assert!(matches!(result, Err(EndpointError::Engine(_))));
    }
}
