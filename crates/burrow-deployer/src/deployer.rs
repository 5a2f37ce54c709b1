//! Remote orchestration of one tunnel endpoint host
//!
//! A [`Deployer`] owns a single remote session. Through it the deployer
//! makes the tunnel engine available, uploads and (re)starts the endpoint,
//! keeps its heartbeat fresh and answers status, health and log queries.
//! Every operation is safe to repeat against a host that still carries
//! state from a crashed earlier run.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;

use burrow_core::command::Privilege;
use burrow_core::config::{DeployerConfig, EndpointConfig};
use burrow_core::error::{BurrowError, ConfigError, ConnectionError, DeployError};
use burrow_core::exec::{quote, CommandRunner};
use burrow_core::install::{
    resolve_engine, ExistingBinary, InstallStrategy, KernelProbe, PackageManager, SourceBuild,
    DEFAULT_TOOLS_SOURCE, USERSPACE_ENGINE,
};
use burrow_core::liveness::{parse_timestamp, HEARTBEAT_FILE_NAME};
use burrow_core::network::work_dir_for_port;
use burrow_core::types::{EngineKind, Platform};

use crate::engine::LocalBuildUpload;
use crate::heartbeat::HeartbeatEmitter;
use crate::platform::{detect_platform, select_binary};
use crate::process::{
    find_pids, launch_command, process_name, stop_process, StopOutcome, CONFIG_FILE_NAME,
    SERVER_LOG_NAME, STALE_KILL_GRACE, STOP_GRACE,
};
use crate::transport::{OutputChunk, RemoteExec, SshSession, StreamOutcome, SudoRunner};

/// How long a freshly launched endpoint has to show up in the process table
const STARTUP_WAIT: Duration = Duration::from_secs(5);

/// How often a running endpoint is checked for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on the health check's session round trip
const HEALTH_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the health check's reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Log lines shown when the endpoint dies during startup
const STARTUP_LOG_LINES: usize = 20;

/// Where a deployed endpoint lives on the remote host
#[derive(Debug, Clone)]
pub struct DeployedEndpoint {
    pub work_dir: String,
    pub binary_path: String,
    pub config_path: String,
    pub process_name: String,
    /// The configuration as uploaded
    pub config: EndpointConfig,
}

impl DeployedEndpoint {
    pub fn heartbeat_path(&self) -> String {
        format!("{}/{}", self.work_dir, HEARTBEAT_FILE_NAME)
    }

    pub fn server_log_path(&self) -> String {
        format!("{}/{}", self.work_dir, SERVER_LOG_NAME)
    }

    pub fn engine_log_path(&self) -> String {
        self.config.log_path().to_string_lossy().into_owned()
    }
}

/// Why `start_server` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    /// The caller cancelled and the endpoint was stopped
    Cancelled,
    /// The endpoint process went away on its own
    Exited,
}

/// Snapshot of an endpoint's remote process and heartbeat
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub process_name: String,
    pub pids: Vec<u32>,
    /// Age of the heartbeat by the remote clock, if one was written
    pub heartbeat_age: Option<Duration>,
}

impl ServerStatus {
    pub fn running(&self) -> bool {
        !self.pids.is_empty()
    }
}

/// Result of one reachability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub addr: String,
    pub reachable: bool,
}

/// Outcome of [`Deployer::check_health`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub session_alive: bool,
    /// Present when a private address was known to probe
    pub probe: Option<ProbeResult>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.session_alive && self.probe.as_ref().map_or(true, |p| p.reachable)
    }
}

/// Tails of an endpoint's logs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteLogs {
    /// Endpoint stdout/stderr
    pub server: String,
    /// Tunnel engine output
    pub engine: String,
}

/// Drives one remote host
pub struct Deployer {
    config: DeployerConfig,
    session: OnceCell<Arc<dyn RemoteExec>>,
    platform: Mutex<Option<Platform>>,
    engine: Mutex<Option<EngineKind>>,
    deployed: Mutex<Option<DeployedEndpoint>>,
    heartbeat: tokio::sync::Mutex<Option<HeartbeatEmitter>>,
}

impl Deployer {
    /// Create a deployer; no connection is made until [`connect`](Self::connect)
    pub fn new(config: DeployerConfig) -> Self {
        Self {
            config,
            session: OnceCell::new(),
            platform: Mutex::new(None),
            engine: Mutex::new(None),
            deployed: Mutex::new(None),
            heartbeat: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a deployer over an already-open session
    pub fn with_session(config: DeployerConfig, session: Arc<dyn RemoteExec>) -> Self {
        let deployer = Self::new(config);
        let _ = deployer.session.set(session);
        deployer
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Open the remote session
    ///
    /// A deployer holds at most one session; connecting again is a no-op.
    pub async fn connect(&self) -> Result<(), BurrowError> {
        if self.session.initialized() {
            tracing::debug!("Already connected to {}", self.config.host);
            return Ok(());
        }
        let session = SshSession::connect(&self.config).await?;
        if self.session.set(Arc::new(session)).is_err() {
            tracing::debug!("Concurrent connect to {}; keeping the first session", self.config.host);
        }
        tracing::info!("Connected to {}", self.config.host);
        Ok(())
    }

    fn exec(&self) -> Result<Arc<dyn RemoteExec>, ConnectionError> {
        let exec = self.session.get().ok_or(ConnectionError::NotConnected)?;
        if exec.is_closed() {
            return Err(ConnectionError::SessionClosed);
        }
        Ok(Arc::clone(exec))
    }

    fn runner(&self) -> Result<SudoRunner, ConnectionError> {
        Ok(SudoRunner::new(
            self.exec()?,
            self.config.sudo_password.clone(),
        ))
    }

    fn privilege(&self) -> Privilege {
        self.config.privilege()
    }

    fn failed(&self, step: &str, detail: impl std::fmt::Display) -> DeployError {
        DeployError::Deployment {
            host: self.config.host.clone(),
            step: step.to_string(),
            detail: detail.to_string(),
        }
    }

    /// The remote OS and architecture, detected once per deployer
    pub async fn platform(&self) -> Result<Platform, BurrowError> {
        if let Some(platform) = self.platform.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Ok(platform);
        }
        let runner = self.runner()?;
        let platform = detect_platform(&runner)
            .await
            .map_err(|e| self.failed("detect platform", e))?;
        tracing::info!("{} is {}", self.config.host, platform);
        *self.platform.lock().unwrap_or_else(|e| e.into_inner()) = Some(platform.clone());
        Ok(platform)
    }

    /// Make the tunnel engine available on the remote host
    ///
    /// Tries, in order: native kernel support, an installed userspace
    /// binary, the package manager, a remote source build and a local build
    /// uploaded over the session. Fails only when all of them fail.
    pub async fn ensure_dependency_installed(&self) -> Result<EngineKind, BurrowError> {
        let exec = self.exec()?;
        let runner = self.runner()?;
        let platform = self.platform().await?;
        let privilege = self.privilege();
        let base = self.config.work_dir.trim_end_matches('/').to_string();

        runner
            .check(&format!("mkdir -p {}", quote(&base)))
            .await
            .map_err(|e| self.failed("create work dir", e))?;

        let chain: Vec<Box<dyn InstallStrategy>> = vec![
            Box::new(KernelProbe::new(privilege)),
            Box::new(ExistingBinary::new(vec![format!("{}/{}", base, USERSPACE_ENGINE)])),
            Box::new(PackageManager::new(privilege, &base)),
            Box::new(
                SourceBuild::new(privilege, &base)
                    .with_sources(self.config.engine_source_url.clone(), DEFAULT_TOOLS_SOURCE),
            ),
            Box::new(LocalBuildUpload::new(
                exec,
                self.config.engine_source_dir.clone(),
                platform,
                &base,
            )),
        ];

        let kind = resolve_engine(&runner, &chain).await.map_err(|attempts| {
            DeployError::DependencyUnavailable {
                host: self.config.host.clone(),
                attempts,
            }
        })?;
        *self.engine.lock().unwrap_or_else(|e| e.into_inner()) = Some(kind.clone());
        Ok(kind)
    }

    /// Upload the endpoint binary and its configuration
    ///
    /// Any endpoint already running for the same port is stopped first, so
    /// repeated deploys leave at most one endpoint process.
    pub async fn deploy(&self, endpoint: &EndpointConfig) -> Result<DeployedEndpoint, BurrowError> {
        let exec = self.exec()?;
        let runner = self.runner()?;
        let work_dir = work_dir_for_port(&self.config.work_dir, endpoint.listen_port);
        let name = process_name(endpoint.listen_port);
        tracing::info!("Deploying {} to {}:{}", name, self.config.host, work_dir);

        match stop_process(&runner, self.privilege(), &name, STALE_KILL_GRACE)
            .await
            .map_err(|e| self.failed("stop stale endpoint", e))?
        {
            StopOutcome::NotRunning => {}
            outcome => tracing::info!("Stopped stale {} ({:?})", name, outcome),
        }

        runner
            .check(&format!("mkdir -p {}", quote(&work_dir)))
            .await
            .map_err(|e| self.failed("create work dir", e))?;

        let platform = self.platform().await?;
        let local_binary = select_binary(&self.config.host, &self.config.artifacts_dir, &platform).await?;
        let binary = tokio::fs::read(&local_binary)
            .await
            .map_err(|e| self.failed("read endpoint binary", format!("{}: {}", local_binary.display(), e)))?;
        let binary_path = format!("{}/{}", work_dir, name);
        exec.upload(&binary, &binary_path, 0o755)
            .await
            .map_err(|e| self.failed("upload binary", e))?;

        let mut config = endpoint.clone();
        config.work_dir = PathBuf::from(&work_dir);
        config.heartbeat_file = Some(config.work_dir.join(HEARTBEAT_FILE_NAME));
        if config.engine.is_none() {
            config.engine = self.engine.lock().unwrap_or_else(|e| e.into_inner()).clone();
        }
        let rendered = toml::to_string_pretty(&config).map_err(ConfigError::from)?;
        let config_path = format!("{}/{}", work_dir, CONFIG_FILE_NAME);
        exec.upload(rendered.as_bytes(), &config_path, 0o600)
            .await
            .map_err(|e| self.failed("upload config", e))?;

        // A heartbeat left by an earlier controller would read as stale
        let heartbeat = format!("{}/{}", work_dir, HEARTBEAT_FILE_NAME);
        runner
            .check(&format!("rm -f {}", quote(&heartbeat)))
            .await
            .map_err(|e| self.failed("clear heartbeat", e))?;

        let deployed = DeployedEndpoint {
            work_dir,
            binary_path,
            config_path,
            process_name: name,
            config,
        };
        *self.deployed.lock().unwrap_or_else(|e| e.into_inner()) = Some(deployed.clone());
        tracing::info!("Deployed {} to {}", deployed.process_name, self.config.host);
        Ok(deployed)
    }

    /// Check that the endpoint can be started before launching it
    async fn preflight(
        &self,
        runner: &dyn CommandRunner,
        deployed: &DeployedEndpoint,
    ) -> Result<(), BurrowError> {
        let host = &self.config.host;
        match self.privilege() {
            Privilege::Root => {}
            Privilege::Sudo => {
                if !runner.run("sudo -n true").await?.success() {
                    return Err(DeployError::Privilege {
                        host: host.clone(),
                        remediation: format!(
                            "Passwordless sudo is not available for '{user}'. Either:\n  \
                             1. Run `sudo visudo` on {host} and add:\n       \
                             {user} ALL=(root) NOPASSWD: ALL\n     \
                             or, more narrowly, list {binary} together with pkill, ip, wg and iptables.\n  \
                             2. Or set `sudo_password` in the deployer configuration.",
                            user = self.config.username,
                            host = host,
                            binary = deployed.binary_path,
                        ),
                    }
                    .into());
                }
            }
            Privilege::SudoWithPassword => {
                if !runner.run("sudo -S -p '' true").await?.success() {
                    return Err(DeployError::Privilege {
                        host: host.clone(),
                        remediation: format!(
                            "{} rejected the configured sudo password for '{}'. \
                             Check `sudo_password`, or confirm the user is in the sudoers file.",
                            host, self.config.username
                        ),
                    }
                    .into());
                }
            }
        }

        for (path, what) in [
            (&deployed.binary_path, "executable"),
            (&deployed.config_path, "readable"),
        ] {
            let flag = if what == "executable" { "-x" } else { "-r" };
            if !runner.run(&format!("test {} {}", flag, quote(path))).await?.success() {
                return Err(self
                    .failed(
                        "preflight",
                        format!("{} is missing or not {}; run deploy first", path, what),
                    )
                    .into());
            }
        }
        Ok(())
    }

    /// Start the deployed endpoint and stream its output until it exits or
    /// `cancel` fires
    ///
    /// Output goes to `output` when given, otherwise to the log. On
    /// cancellation the endpoint is terminated gracefully and force-killed
    /// after five seconds.
    pub async fn start_server(
        &self,
        deployed: &DeployedEndpoint,
        output: Option<mpsc::Sender<OutputChunk>>,
        cancel: CancellationToken,
    ) -> Result<ServerExit, BurrowError> {
        let exec = self.exec()?;
        let runner = self.runner()?;
        let name = &deployed.process_name;

        self.preflight(&runner, deployed).await?;

        if !find_pids(&runner, name).await?.is_empty() {
            return Err(self
                .failed("start", format!("{} is already running; stop it or redeploy", name))
                .into());
        }

        let launch = launch_command(self.privilege(), &deployed.work_dir, name);
        runner
            .check(&launch)
            .await
            .map_err(|e| self.failed("launch", e))?;

        let pids = self.wait_for_start(&runner, deployed).await?;
        tracing::info!("{} running on {} (pids {:?})", name, self.config.host, pids);

        let sink = match output {
            Some(sink) => sink,
            None => log_sink(self.config.host.clone()),
        };
        let stream_cancel = cancel.child_token();
        let stream = {
            let exec = Arc::clone(&exec);
            let token = stream_cancel.clone();
            let command = format!("tail -n +1 -F {}", quote(&deployed.server_log_path()));
            tokio::spawn(async move { exec.run_streaming(&command, sink, token).await })
        };

        let mut ticker = tokio::time::interval(EXIT_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break ServerExit::Cancelled,
                _ = ticker.tick() => match find_pids(&runner, name).await {
                    Ok(pids) if pids.is_empty() => break ServerExit::Exited,
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Checking {}: {}", name, e),
                },
            }
        };

        if exit == ServerExit::Cancelled {
            tracing::info!("Cancellation requested; stopping {}", name);
            let outcome = stop_process(&runner, self.privilege(), name, STOP_GRACE)
                .await
                .map_err(|e| self.failed("stop", e))?;
            tracing::info!("{} stopped ({:?})", name, outcome);
        } else {
            tracing::warn!("{} exited on {}", name, self.config.host);
        }

        stream_cancel.cancel();
        match stream.await {
            Ok(Ok(StreamOutcome::Exited(code))) => tracing::debug!("Log stream ended ({})", code),
            Ok(Ok(StreamOutcome::Cancelled)) => {}
            Ok(Err(e)) => tracing::debug!("Log stream failed: {}", e),
            Err(e) => tracing::debug!("Log stream task failed: {}", e),
        }
        Ok(exit)
    }

    async fn wait_for_start(
        &self,
        runner: &dyn CommandRunner,
        deployed: &DeployedEndpoint,
    ) -> Result<Vec<u32>, BurrowError> {
        let deadline = tokio::time::Instant::now() + STARTUP_WAIT;
        loop {
            let pids = find_pids(runner, &deployed.process_name).await?;
            if !pids.is_empty() {
                return Ok(pids);
            }
            if tokio::time::Instant::now() >= deadline {
                let tail = runner
                    .run(&format!(
                        "tail -n {} {}",
                        STARTUP_LOG_LINES,
                        quote(&deployed.server_log_path())
                    ))
                    .await
                    .map(|out| out.stdout)
                    .unwrap_or_default();
                return Err(self
                    .failed(
                        "start",
                        format!("{} did not start. Last output:\n{}", deployed.process_name, tail.trim_end()),
                    )
                    .into());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Stop the endpoint for `listen_port`: SIGTERM, then SIGKILL after five
    /// seconds
    pub async fn stop_server(&self, listen_port: u16) -> Result<StopOutcome, BurrowError> {
        let runner = self.runner()?;
        let name = process_name(listen_port);
        let outcome = stop_process(&runner, self.privilege(), &name, STOP_GRACE)
            .await
            .map_err(|e| self.failed("stop", e))?;
        Ok(outcome)
    }

    /// Look up the endpoint for `listen_port`
    pub async fn get_server_status(&self, listen_port: u16) -> Result<ServerStatus, BurrowError> {
        let runner = self.runner()?;
        let name = process_name(listen_port);
        let pids = find_pids(&runner, &name).await?;

        let heartbeat = format!(
            "{}/{}",
            work_dir_for_port(&self.config.work_dir, listen_port),
            HEARTBEAT_FILE_NAME
        );
        // Both timestamps come from the remote clock
        let out = runner
            .run(&format!("cat {} 2>/dev/null; echo; date +%s", quote(&heartbeat)))
            .await?;
        let lines: Vec<&str> = out.stdout.lines().filter(|l| !l.trim().is_empty()).collect();
        let heartbeat_age = match lines.as_slice() {
            [written, now] => match (parse_timestamp(written), parse_timestamp(now)) {
                (Some(written), Some(now)) => Some(Duration::from_secs(now.saturating_sub(written))),
                _ => None,
            },
            _ => None,
        };

        Ok(ServerStatus {
            process_name: name,
            pids,
            heartbeat_age,
        })
    }

    /// Start refreshing the heartbeat in `work_dir`, replacing any running
    /// emitter
    pub async fn start_heartbeat(&self, work_dir: &str) -> Result<(), BurrowError> {
        let exec = self.exec()?;
        let mut slot = self.heartbeat.lock().await;
        if let Some(previous) = slot.take() {
            tracing::debug!("Replacing heartbeat for {}", previous.path());
            previous.stop().await;
        }
        let path = format!("{}/{}", work_dir.trim_end_matches('/'), HEARTBEAT_FILE_NAME);
        *slot = Some(HeartbeatEmitter::start(exec, path, self.config.heartbeat_interval));
        Ok(())
    }

    /// Stop the heartbeat, returning how many stamps were written
    pub async fn stop_heartbeat(&self) -> Option<u64> {
        let emitter = self.heartbeat.lock().await.take()?;
        Some(emitter.stop().await)
    }

    /// Check the session and, when a private address is known, reach it
    /// from the remote host
    pub async fn check_health(&self) -> Result<HealthReport, BurrowError> {
        let exec = match self.exec() {
            Ok(exec) => exec,
            Err(ConnectionError::SessionClosed) => {
                return Ok(HealthReport {
                    session_alive: false,
                    probe: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let session_alive = matches!(
            tokio::time::timeout(HEALTH_COMMAND_TIMEOUT, exec.run("true")).await,
            Ok(Ok(out)) if out.success()
        );
        if !session_alive {
            return Ok(HealthReport {
                session_alive,
                probe: None,
            });
        }

        let target = self
            .deployed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|d| d.config.routed_addrs.first().cloned());
        let probe = match target {
            Some(addr) => {
                let command = format!("ping -c 1 -W 2 {}", quote(&addr));
                let reachable = matches!(
                    tokio::time::timeout(PROBE_TIMEOUT, exec.run(&command)).await,
                    Ok(Ok(out)) if out.success()
                );
                tracing::debug!("Probe {} reachable={}", addr, reachable);
                Some(ProbeResult { addr, reachable })
            }
            None => None,
        };

        Ok(HealthReport {
            session_alive,
            probe,
        })
    }

    /// Fetch the last `lines` lines of the endpoint's logs
    ///
    /// A log that does not exist yet comes back empty.
    pub async fn fetch_logs(&self, listen_port: u16, lines: usize) -> Result<RemoteLogs, BurrowError> {
        let exec = self.exec()?;
        let work_dir = work_dir_for_port(&self.config.work_dir, listen_port);
        let engine_log = self
            .deployed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|d| d.config.listen_port == listen_port)
            .map(|d| d.engine_log_path())
            .unwrap_or_else(|| format!("{}/{}", work_dir, burrow_core::config::ENGINE_LOG_NAME));

        let server = fetch_tail(exec.as_ref(), &format!("{}/{}", work_dir, SERVER_LOG_NAME), lines).await;
        let engine = fetch_tail(exec.as_ref(), &engine_log, lines).await;
        Ok(RemoteLogs { server, engine })
    }

    /// Stop the heartbeat and close the session
    pub async fn close(&self) -> Result<(), BurrowError> {
        self.stop_heartbeat().await;
        if let Some(exec) = self.session.get() {
            exec.close().await?;
        }
        Ok(())
    }
}

async fn fetch_tail(exec: &dyn RemoteExec, path: &str, lines: usize) -> String {
    match exec.download(path).await {
        Ok(bytes) => tail_lines(&String::from_utf8_lossy(&bytes), lines),
        Err(e) => {
            tracing::debug!("No log at {}: {}", path, e);
            String::new()
        }
    }
}

fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// A sink that writes streamed endpoint output to the log
fn log_sink(host: String) -> mpsc::Sender<OutputChunk> {
    let (tx, mut rx) = mpsc::channel::<OutputChunk>(64);
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            for line in String::from_utf8_lossy(chunk.bytes()).lines() {
                tracing::info!(target: "burrow_deployer::remote", "[{}] {}", host, line);
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedRemote;
    use burrow_core::exec::CommandOutput;
    use burrow_core::keys::KeyPair;
    use burrow_core::network::allocate_network;
    use tempfile::TempDir;

    fn config(artifacts: &TempDir) -> DeployerConfig {
        DeployerConfig {
            host: "box".to_string(),
            username: "root".to_string(),
            artifacts_dir: artifacts.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn artifacts() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("burrow-server-x86_64-unknown-linux-musl"),
            b"\x7fELF",
        )
        .unwrap();
        dir
    }

    fn endpoint() -> EndpointConfig {
        let alloc = allocate_network(1).unwrap();
        EndpointConfig::for_allocation(&alloc, &KeyPair::generate(), "/somewhere/else")
    }

    fn remote() -> Arc<ScriptedRemote> {
        let remote = Arc::new(ScriptedRemote::new("box"));
        remote.runner().respond("uname", CommandOutput::ok("Linux\nx86_64\n"));
        remote.runner().respond("pgrep", CommandOutput::failed(1, ""));
        remote
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let deployer = Deployer::new(DeployerConfig::default());
        let err = deployer.deploy(&endpoint()).await.unwrap_err();
        assert!(matches!(
            err,
            BurrowError::Connection(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_deploy_uploads_binary_and_config() {
        let dir = artifacts();
        let remote = remote();
        let deployer = Deployer::with_session(config(&dir), remote.clone());

        let deployed = deployer.deploy(&endpoint()).await.unwrap();
        assert_eq!(deployed.work_dir, "/tmp/burrow/51821");
        assert_eq!(deployed.binary_path, "/tmp/burrow/51821/burrow-51821");
        assert_eq!(remote.file(&deployed.binary_path).unwrap(), b"\x7fELF");

        let uploaded = String::from_utf8(remote.file(&deployed.config_path).unwrap()).unwrap();
        let parsed: EndpointConfig = toml::from_str(&uploaded).unwrap();
        assert_eq!(parsed.work_dir, PathBuf::from("/tmp/burrow/51821"));
        assert_eq!(
            parsed.heartbeat_file,
            Some(PathBuf::from("/tmp/burrow/51821/heartbeat"))
        );

        let commands = remote.commands();
        let mkdir = commands.iter().position(|c| c == "mkdir -p /tmp/burrow/51821").unwrap();
        let upload = commands.iter().position(|c| c.starts_with("# upload")).unwrap();
        assert!(mkdir < upload);
        assert_eq!(remote.runner().count_matching("rm -f /tmp/burrow/51821/heartbeat"), 1);
    }

    #[tokio::test]
    async fn test_deploy_rejects_unsupported_platform() {
        let dir = artifacts();
        let remote = remote();
        remote.runner().respond("uname", CommandOutput::ok("Darwin\narm64\n"));
        let deployer = Deployer::with_session(config(&dir), remote);

        let err = deployer.deploy(&endpoint()).await.unwrap_err();
        assert!(matches!(
            err,
            BurrowError::Deploy(DeployError::UnsupportedPlatform { .. })
        ));
    }

    #[tokio::test]
    async fn test_dependency_chain_short_circuits_on_kernel() {
        let dir = artifacts();
        let remote = remote();
        let deployer = Deployer::with_session(config(&dir), remote.clone());

        let kind = deployer.ensure_dependency_installed().await.unwrap();
        assert_eq!(kind, EngineKind::Kernel);
        assert_eq!(remote.runner().count_matching("apt-get"), 0);

        // The resolved engine is carried into the uploaded config
        let deployed = deployer.deploy(&endpoint()).await.unwrap();
        assert_eq!(deployed.config.engine, Some(EngineKind::Kernel));
    }

    #[tokio::test]
    async fn test_dependency_exhaustion_lists_every_strategy() {
        let dir = artifacts();
        let remote = remote();
        remote.runner().respond("command -v", CommandOutput::failed(1, ""));
        let deployer = Deployer::with_session(config(&dir), remote);

        let err = deployer.ensure_dependency_installed().await.unwrap_err();
        match err {
            BurrowError::Deploy(DeployError::DependencyUnavailable { host, attempts }) => {
                assert_eq!(host, "box");
                assert_eq!(attempts.len(), 5);
                assert!(attempts[0].starts_with("kernel:"));
                assert!(attempts[4].starts_with("local-build:"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_preflight_reports_sudo_remediation() {
        let dir = artifacts();
        let remote = remote();
        remote
            .runner()
            .respond("sudo -n true", CommandOutput::failed(1, "sudo: a password is required"));
        let mut cfg = config(&dir);
        cfg.username = "deploy".to_string();
        let deployer = Deployer::with_session(cfg, remote.clone());

        let deployed = deployer.deploy(&endpoint()).await.unwrap();
        let err = deployer
            .start_server(&deployed, None, CancellationToken::new())
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("visudo"));
        assert!(msg.contains("deploy ALL=(root) NOPASSWD"));
        assert_eq!(remote.runner().count_matching("nohup"), 0);
    }

    #[tokio::test]
    async fn test_preflight_requires_executable_binary() {
        let dir = artifacts();
        let remote = remote();
        remote
            .runner()
            .respond("test -x", CommandOutput::failed(1, ""));
        let deployer = Deployer::with_session(config(&dir), remote.clone());

        let deployed = deployer.deploy(&endpoint()).await.unwrap();
        let err = deployer
            .start_server(&deployed, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[tokio::test]
    async fn test_status_reads_heartbeat_age() {
        let dir = artifacts();
        let remote = remote();
        remote
            .runner()
            .respond("pgrep -x burrow-51821", CommandOutput::ok("4242\n"));
        remote
            .runner()
            .respond("date +%s", CommandOutput::ok("1700000000\n\n1700000004\n"));
        let deployer = Deployer::with_session(config(&dir), remote);

        let status = deployer.get_server_status(51821).await.unwrap();
        assert!(status.running());
        assert_eq!(status.pids, vec![4242]);
        assert_eq!(status.heartbeat_age, Some(Duration::from_secs(4)));
    }

    #[tokio::test]
    async fn test_status_without_heartbeat() {
        let dir = artifacts();
        let remote = remote();
        remote
            .runner()
            .respond("date +%s", CommandOutput::ok("\n1700000004\n"));
        let deployer = Deployer::with_session(config(&dir), remote);

        let status = deployer.get_server_status(51821).await.unwrap();
        assert!(!status.running());
        assert_eq!(status.heartbeat_age, None);
    }

    #[tokio::test]
    async fn test_health_probes_routed_address() {
        let dir = artifacts();
        let remote = remote();
        remote
            .runner()
            .respond("ping", CommandOutput::failed(1, "100% packet loss"));
        let deployer = Deployer::with_session(config(&dir), remote.clone());

        let report = deployer.check_health().await.unwrap();
        assert!(report.healthy());
        assert_eq!(report.probe, None);

        let mut ep = endpoint();
        ep.routed_addrs = vec!["192.168.5.10".to_string()];
        deployer.deploy(&ep).await.unwrap();

        let report = deployer.check_health().await.unwrap();
        assert!(report.session_alive);
        assert_eq!(
            report.probe,
            Some(ProbeResult {
                addr: "192.168.5.10".to_string(),
                reachable: false
            })
        );
        assert!(!report.healthy());
    }

    #[tokio::test]
    async fn test_health_after_close() {
        let dir = artifacts();
        let remote = remote();
        let deployer = Deployer::with_session(config(&dir), remote.clone());
        deployer.close().await.unwrap();

        let report = deployer.check_health().await.unwrap();
        assert!(!report.session_alive);
    }

    #[tokio::test]
    async fn test_fetch_logs_tails_and_tolerates_missing() {
        let dir = artifacts();
        let remote = remote();
        remote.put_file("/tmp/burrow/51821/server.log", "a\nb\nc\nd\n");
        let deployer = Deployer::with_session(config(&dir), remote);

        let logs = deployer.fetch_logs(51821, 2).await.unwrap();
        assert_eq!(logs.server, "c\nd");
        assert_eq!(logs.engine, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_restart_replaces_emitter() {
        let dir = artifacts();
        let remote = remote();
        let deployer = Deployer::with_session(config(&dir), remote.clone());

        deployer.start_heartbeat("/tmp/burrow/51821").await.unwrap();
        deployer.start_heartbeat("/tmp/burrow/51821/").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(deployer.stop_heartbeat().await.is_some());
        assert!(deployer.stop_heartbeat().await.is_none());
        assert!(remote
            .commands()
            .iter()
            .all(|c| !c.contains("51821//heartbeat")));
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("1\n2\n3", 5), "1\n2\n3");
        assert_eq!(tail_lines("1\n2\n3", 1), "3");
        assert_eq!(tail_lines("", 3), "");
    }
}
