//! Tunnel endpoint lifecycle
//!
//! A [`TunnelEndpoint`] owns one tunnel interface: it brings the engine up,
//! installs forwarding rules, tracks registered peers and tears everything
//! down again. Two background tasks run while it is up. The engine watcher
//! notices an exit nobody asked for, and the heartbeat watchdog stops the
//! endpoint once the controller's liveness file goes stale. Neither talks to
//! the controller; they only read the file and the exit status.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use burrow_core::command::{ForwardRule, NetCommand, Privilege};
use burrow_core::config::{write_private, EndpointConfig};
use burrow_core::error::{BurrowError, DeployError, EndpointError};
use burrow_core::exec::CommandRunner;
use burrow_core::install;
use burrow_core::keys::{self, short_key};
use burrow_core::liveness::WATCHDOG_POLL_INTERVAL;
use burrow_core::pidfile;
use burrow_core::types::{EndpointState, EngineKind};

use crate::conf;
use crate::engine::{EngineLauncher, SupervisedEngine, ENGINE_PID_FILE_NAME};
use crate::firewall;
use crate::peers::{parse_dump, PeerSession, PeerTable};
use crate::watchdog::{self, WatchdogOutcome};

/// Why [`TunnelEndpoint::run_until_shutdown`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The caller's cancellation token fired
    Cancelled,
    /// The controller heartbeat went stale
    ControllerLost,
    /// The engine exited without being asked to
    EngineExited { code: Option<i32> },
    /// Something else stopped the endpoint
    Stopped,
}

/// Tunables that are not part of the deployed configuration
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// How privileged commands are escalated; the endpoint normally runs as root
    pub privilege: Privilege,
    /// Run this program as the engine instead of the resolved one
    pub launcher: Option<EngineLauncher>,
    /// How often the heartbeat watchdog reads the liveness file
    pub watchdog_interval: Duration,
    /// How long to wait for a userspace engine to create its interface
    pub interface_wait: Duration,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            privilege: Privilege::Root,
            launcher: None,
            watchdog_interval: WATCHDOG_POLL_INTERVAL,
            interface_wait: Duration::from_secs(5),
        }
    }
}

/// Resources held while the endpoint is up
#[derive(Default)]
struct Running {
    engine: Option<SupervisedEngine>,
    watchdog: Option<CancellationToken>,
    rules: Vec<ForwardRule>,
}

struct Inner {
    config: EndpointConfig,
    runner: Arc<dyn CommandRunner>,
    options: EndpointOptions,
    state: watch::Sender<EndpointState>,
    peers: PeerTable,
    running: Mutex<Option<Running>>,
    exit_reason: StdMutex<Option<ShutdownReason>>,
}

impl Inner {
    fn set_state(&self, state: EndpointState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!("Endpoint {} -> {}", previous, state);
        }
    }

    fn record_exit(&self, reason: ShutdownReason) {
        *self.exit_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
    }

    fn take_exit(&self) -> Option<ShutdownReason> {
        self.exit_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// One tunnel endpoint; cheap to clone, clones share state
#[derive(Clone)]
pub struct TunnelEndpoint {
    inner: Arc<Inner>,
}

impl TunnelEndpoint {
    pub fn new(config: EndpointConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_options(config, runner, EndpointOptions::default())
    }

    pub fn with_options(
        config: EndpointConfig,
        runner: Arc<dyn CommandRunner>,
        options: EndpointOptions,
    ) -> Self {
        let (state, _) = watch::channel(EndpointState::Stopped);
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                options,
                state,
                peers: PeerTable::new(),
                running: Mutex::new(None),
                exit_reason: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    pub fn interface_name(&self) -> String {
        self.inner.config.interface_name()
    }

    pub fn state(&self) -> EndpointState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<EndpointState> {
        self.inner.state.subscribe()
    }

    /// PID of the supervised engine, if a userspace engine is running
    pub async fn engine_pid(&self) -> Option<u32> {
        self.inner
            .running
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.engine.as_ref())
            .and_then(|e| e.pid())
    }

    pub async fn peers(&self) -> Vec<PeerSession> {
        self.inner.peers.list().await
    }

    pub async fn peer(&self, public_key: &str) -> Option<PeerSession> {
        self.inner.peers.get(public_key).await
    }

    /// Bring the tunnel up
    pub async fn start(&self) -> Result<(), BurrowError> {
        if self.state() != EndpointState::Stopped {
            return Err(EndpointError::AlreadyRunning.into());
        }
        if self.inner.running.lock().await.is_some() {
            tracing::info!("Clearing state left by an engine that exited");
            if let Err(e) = self.stop().await {
                tracing::warn!("Cleanup before start was incomplete: {}", e);
            }
        }
        self.inner.config.validate()?;

        self.inner.take_exit();
        self.inner.set_state(EndpointState::Starting);

        let mut running = Running::default();
        if let Err(e) = self.bring_up(&mut running).await {
            tracing::error!("Endpoint failed to start: {}", e);
            for failure in self.teardown(running).await {
                tracing::warn!("Cleanup after failed start: {}", failure);
            }
            self.inner.set_state(EndpointState::Stopped);
            return Err(e);
        }

        {
            // Held until Running is published so background tasks that stop
            // the endpoint see a consistent state
            let mut guard = self.inner.running.lock().await;
            if running.engine.as_ref().is_some_and(|e| e.has_exited()) {
                drop(guard);
                for failure in self.teardown(running).await {
                    tracing::warn!("Cleanup after failed start: {}", failure);
                }
                self.inner.set_state(EndpointState::Stopped);
                return Err(EndpointError::Engine("engine exited during start".to_string()).into());
            }
            running.watchdog = self.spawn_watchdog();
            *guard = Some(running);
            self.inner.set_state(EndpointState::Running);
        }

        tracing::info!(
            "Endpoint up on {} (port {}, {} peer(s))",
            self.interface_name(),
            self.inner.config.listen_port,
            self.inner.peers.len().await
        );
        Ok(())
    }

    async fn bring_up(&self, running: &mut Running) -> Result<(), BurrowError> {
        let config = &self.inner.config;
        let iface = self.interface_name();
        let kind = self.resolve_engine().await?;

        // A crashed run may have left the interface behind
        if let Err(e) = self
            .run_teardown(&NetCommand::DeleteInterface { name: iface.clone() })
            .await
        {
            tracing::warn!("Could not remove leftover interface: {}", e);
        }

        let conf_path = config.engine_conf_path();
        let rendered = conf::render(config, &self.inner.peers.list().await);
        write_private(&conf_path, &rendered)
            .await
            .map_err(|e| EndpointError::Engine(format!("writing {:?}: {}", conf_path, e)))?;

        match kind {
            EngineKind::Kernel => {
                self.run_net(&NetCommand::CreateInterface { name: iface.clone() })
                    .await?;
            }
            EngineKind::Userspace { binary } => {
                let launcher = self
                    .inner
                    .options
                    .launcher
                    .clone()
                    .unwrap_or_else(|| EngineLauncher::userspace(&binary, &iface));
                let engine =
                    SupervisedEngine::spawn(&launcher, &config.log_path(), self.exit_callback())
                        .await?;
                if let Some(pid) = engine.pid() {
                    let pid_path = config.work_dir.join(ENGINE_PID_FILE_NAME);
                    if let Err(e) = pidfile::write_pid_file(&pid_path, pid) {
                        tracing::warn!("Failed to record engine pid: {}", e);
                    }
                }
                running.engine = Some(engine);
                self.wait_for_interface(&iface, running).await?;
            }
        }

        self.run_net(&NetCommand::SetConf {
            name: iface.clone(),
            path: conf_path.to_string_lossy().into_owned(),
        })
        .await?;
        self.run_net(&NetCommand::SetAddress {
            name: iface.clone(),
            cidr: config.server_cidr(),
        })
        .await?;
        self.run_net(&NetCommand::LinkUp { name: iface.clone() })
            .await?;

        if let Some(egress) = &config.egress_interface {
            let rules = ForwardRule::for_tunnel(&iface, &config.vpn_subnet, egress);
            running.rules =
                firewall::install(self.inner.runner.as_ref(), self.inner.options.privilege, &rules)
                    .await?;
        }

        Ok(())
    }

    fn spawn_watchdog(&self) -> Option<CancellationToken> {
        let config = &self.inner.config;
        let Some(path) = config.heartbeat_file.clone() else {
            tracing::info!("No heartbeat file configured; watchdog disabled");
            return None;
        };

        let token = CancellationToken::new();
        let endpoint = self.clone();
        let stale_after = config.stale_after;
        let interval = self.inner.options.watchdog_interval;
        let cancel = token.clone();
        tokio::spawn(async move {
            if let WatchdogOutcome::ControllerLost { age } =
                watchdog::watch(path, stale_after, interval, cancel).await
            {
                tracing::error!("No heartbeat for {:?}; controller lost, tearing down", age);
                endpoint.inner.record_exit(ShutdownReason::ControllerLost);
                if let Err(e) = endpoint.stop().await {
                    tracing::error!("Self-destruct teardown incomplete: {}", e);
                }
            }
        });
        Some(token)
    }

    async fn resolve_engine(&self) -> Result<EngineKind, BurrowError> {
        if let Some(launcher) = &self.inner.options.launcher {
            return Ok(EngineKind::Userspace {
                binary: launcher.program.clone(),
            });
        }
        if let Some(kind) = &self.inner.config.engine {
            return Ok(kind.clone());
        }

        let work_dir = self.inner.config.work_dir.to_string_lossy();
        let chain = install::default_chain(self.inner.options.privilege, &work_dir);
        install::resolve_engine(self.inner.runner.as_ref(), &chain)
            .await
            .map_err(|attempts| {
                DeployError::DependencyUnavailable {
                    host: "localhost".to_string(),
                    attempts,
                }
                .into()
            })
    }

    fn exit_callback(&self) -> Box<dyn FnOnce(Option<i32>) + Send + 'static> {
        let weak = Arc::downgrade(&self.inner);
        Box::new(move |code| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Wait out a start still publishing its state
            tokio::spawn(async move {
                let _guard = inner.running.lock().await;
                inner.record_exit(ShutdownReason::EngineExited { code });
                inner.set_state(EndpointState::Stopped);
            });
        })
    }

    async fn wait_for_interface(&self, iface: &str, running: &Running) -> Result<(), EndpointError> {
        let probe = NetCommand::InterfaceExists {
            name: iface.to_string(),
        };
        let deadline = tokio::time::Instant::now() + self.inner.options.interface_wait;

        loop {
            if running.engine.as_ref().is_some_and(|e| e.has_exited()) {
                return Err(EndpointError::Engine(
                    "engine exited before creating its interface".to_string(),
                ));
            }
            let out = self
                .inner
                .runner
                .run(&self.inner.options.privilege.wrap_command(&probe))
                .await
                .map_err(|e| EndpointError::Engine(e.to_string()))?;
            if out.success() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EndpointError::Engine(format!(
                    "interface {} did not appear within {:?}",
                    iface, self.inner.options.interface_wait
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Tear the tunnel down
    ///
    /// Safe on a never-started endpoint and safe to repeat; every step
    /// tolerates its target already being gone.
    pub async fn stop(&self) -> Result<(), EndpointError> {
        // Held for the whole teardown so a concurrent stop returns only once
        // it is finished
        let mut guard = self.inner.running.lock().await;
        let Some(running) = guard.take() else {
            tracing::debug!("Endpoint not running; nothing to stop");
            return Ok(());
        };

        self.inner.set_state(EndpointState::Stopping);
        let failures = self.teardown(running).await;
        self.inner.set_state(EndpointState::Stopped);
        drop(guard);

        if failures.is_empty() {
            tracing::info!("Endpoint on {} stopped", self.interface_name());
            Ok(())
        } else {
            Err(EndpointError::Engine(format!(
                "teardown incomplete: {}",
                failures.join("; ")
            )))
        }
    }

    async fn teardown(&self, running: Running) -> Vec<String> {
        let config = &self.inner.config;
        let iface = self.interface_name();
        let mut failures = Vec::new();

        if let Some(engine) = &running.engine {
            engine.mark_stopping();
        }
        if let Some(token) = running.watchdog {
            token.cancel();
        }

        // Derive the full rule set so rules from earlier runs go too
        let rules = match &config.egress_interface {
            Some(egress) => ForwardRule::for_tunnel(&iface, &config.vpn_subnet, egress),
            None => running.rules,
        };
        for rule in &rules {
            match firewall::remove_all(self.inner.runner.as_ref(), self.inner.options.privilege, rule)
                .await
            {
                Ok(n) if n > 0 => tracing::info!("Removed {} instance(s) of rule: {}", n, rule),
                Ok(_) => {}
                Err(e) => failures.push(e.to_string()),
            }
        }

        if let Err(e) = self
            .run_teardown(&NetCommand::DeleteInterface { name: iface })
            .await
        {
            failures.push(e);
        }

        if let Some(engine) = running.engine {
            engine.shutdown().await;
        }

        if let Err(e) = pidfile::remove_pid_file(&config.work_dir.join(ENGINE_PID_FILE_NAME)) {
            failures.push(format!("removing engine pid file: {}", e));
        }
        match tokio::fs::remove_file(config.engine_conf_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => failures.push(format!("removing engine config: {}", e)),
        }

        failures
    }

    /// Register the peers listed in the configuration
    pub async fn register_configured_peers(&self) -> Result<(), BurrowError> {
        for peer in self.inner.config.peers.clone() {
            self.add_peer(&peer.public_key, peer.client_addr, peer.allowed_subnets)
                .await?;
        }
        Ok(())
    }

    /// Register a peer, applying it to the live interface when running
    pub async fn add_peer(
        &self,
        public_key: &str,
        client_addr: Ipv4Addr,
        allowed_subnets: Vec<String>,
    ) -> Result<(), BurrowError> {
        keys::validate(public_key)?;
        let session = PeerSession::new(public_key.trim().to_string(), client_addr, allowed_subnets);
        let command = NetCommand::SetPeer {
            name: self.interface_name(),
            public_key: session.public_key.clone(),
            allowed_ips: session.allowed_ips(),
            endpoint: None,
            keepalive: self.inner.config.keepalive,
        };
        let key = session.public_key.clone();
        self.inner.peers.insert(session).await?;

        if self.state() == EndpointState::Running {
            if let Err(e) = self.run_net(&command).await {
                self.inner.peers.remove(&key).await.ok();
                return Err(e.into());
            }
        }

        tracing::info!("Registered peer {} at {}", short_key(&key), client_addr);
        Ok(())
    }

    /// Unregister a peer, removing it from the live interface when running
    pub async fn remove_peer(&self, public_key: &str) -> Result<(), EndpointError> {
        let session = self.inner.peers.remove(public_key.trim()).await?;

        if self.state() == EndpointState::Running {
            let command = NetCommand::RemovePeer {
                name: self.interface_name(),
                public_key: session.public_key.clone(),
            };
            self.run_teardown(&command)
                .await
                .map_err(EndpointError::Engine)?;
        }

        tracing::info!("Removed peer {}", short_key(&session.public_key));
        Ok(())
    }

    /// Pull handshake and transfer counters from the engine into the peer table
    pub async fn refresh_peer_stats(&self) -> Result<usize, EndpointError> {
        if self.state() != EndpointState::Running {
            return Err(EndpointError::NotRunning);
        }
        let command = NetCommand::ShowDump {
            name: self.interface_name(),
        };
        let out = self
            .inner
            .runner
            .run(&self.inner.options.privilege.wrap_command(&command))
            .await
            .map_err(|e| EndpointError::Engine(e.to_string()))?
            .into_result(&command.render())
            .map_err(|e| EndpointError::Engine(e.to_string()))?;

        Ok(self.inner.peers.apply_stats(&parse_dump(&out.stdout)).await)
    }

    /// Wait for cancellation or for the endpoint to stop on its own, then
    /// make sure everything is torn down
    ///
    /// Returns only after any teardown already in flight has completed.
    pub async fn run_until_shutdown(&self, cancel: CancellationToken) -> ShutdownReason {
        let mut state = self.subscribe();
        let stopped = async {
            let _ = state.wait_for(|s| *s == EndpointState::Stopped).await;
        };

        let reason = tokio::select! {
            _ = cancel.cancelled() => ShutdownReason::Cancelled,
            _ = stopped => self.inner.take_exit().unwrap_or(ShutdownReason::Stopped),
        };

        tracing::info!("Shutting down endpoint: {:?}", reason);
        if let Err(e) = self.stop().await {
            tracing::error!("Shutdown teardown incomplete: {}", e);
        }
        reason
    }

    async fn run_net(&self, command: &NetCommand) -> Result<(), EndpointError> {
        let line = self.inner.options.privilege.wrap_command(command);
        let out = self
            .inner
            .runner
            .run(&line)
            .await
            .map_err(|e| EndpointError::Engine(e.to_string()))?;
        if out.success() {
            return Ok(());
        }
        if command.is_already_present(&out.stderr) {
            tracing::debug!("Already present: {}", command);
            return Ok(());
        }
        Err(EndpointError::Engine(format!(
            "`{}` failed: {}",
            command,
            out.stderr.trim()
        )))
    }

    async fn run_teardown(&self, command: &NetCommand) -> Result<(), String> {
        let line = self.inner.options.privilege.wrap_command(command);
        match self.inner.runner.run(&line).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) if command.is_already_absent(&out.stderr) => {
                tracing::debug!("Already absent: {}", command);
                Ok(())
            }
            Ok(out) => Err(format!("`{}` failed: {}", command, out.stderr.trim())),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::exec::{CommandOutput, RecordingRunner};
    use burrow_core::keys::KeyPair;
    use burrow_core::network::allocate_network;
    use tempfile::TempDir;

    fn endpoint(dir: &TempDir) -> (TunnelEndpoint, Arc<RecordingRunner>) {
        let mut config = EndpointConfig::for_allocation(
            &allocate_network(1).unwrap(),
            &KeyPair::generate(),
            &dir.path().to_string_lossy(),
        );
        config.engine = Some(EngineKind::Kernel);
        config.heartbeat_file = None;
        let runner = Arc::new(RecordingRunner::new());
        (TunnelEndpoint::new(config, runner.clone()), runner)
    }

    #[tokio::test]
    async fn test_stop_never_started_is_ok() {
        let dir = TempDir::new().unwrap();
        let (ep, runner) = endpoint(&dir);
        ep.stop().await.unwrap();
        assert_eq!(ep.state(), EndpointState::Stopped);
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let dir = TempDir::new().unwrap();
        let (ep, _runner) = endpoint(&dir);
        ep.start().await.unwrap();
        let err = ep.start().await.unwrap_err();
        assert!(matches!(
            err,
            BurrowError::Endpoint(EndpointError::AlreadyRunning)
        ));
        ep.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_configures_kernel_interface() {
        let dir = TempDir::new().unwrap();
        let (ep, runner) = endpoint(&dir);
        ep.start().await.unwrap();

        let commands = runner.commands();
        let pos = |needle: &str| {
            commands
                .iter()
                .position(|c| c.contains(needle))
                .unwrap_or_else(|| panic!("missing {needle}"))
        };
        assert!(pos("ip link del dev bws21") < pos("ip link add dev bws21 type wireguard"));
        assert!(pos("type wireguard") < pos("wg setconf bws21"));
        assert!(pos("ip address add 10.99.1.1/24 dev bws21") < pos("ip link set dev bws21 up"));
        assert_eq!(runner.count_matching("iptables"), 0);
        assert!(ep.config().engine_conf_path().exists());

        ep.stop().await.unwrap();
        assert!(!ep.config().engine_conf_path().exists());
    }

    #[tokio::test]
    async fn test_failed_start_returns_to_stopped() {
        let dir = TempDir::new().unwrap();
        let (ep, runner) = endpoint(&dir);
        runner.respond(
            "ip address add",
            CommandOutput::failed(2, "RTNETLINK answers: Permission denied"),
        );

        let err = ep.start().await.unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
        assert_eq!(ep.state(), EndpointState::Stopped);
        assert_eq!(runner.count_matching("ip link del dev bws21"), 2);
    }

    #[tokio::test]
    async fn test_peer_applied_live_only_when_running() {
        let dir = TempDir::new().unwrap();
        let (ep, runner) = endpoint(&dir);
        let peer = KeyPair::generate().public_key;

        ep.add_peer(&peer, Ipv4Addr::new(10, 99, 1, 2), vec![])
            .await
            .unwrap();
        assert_eq!(runner.count_matching("wg set"), 0);

        ep.start().await.unwrap();
        let other = KeyPair::generate().public_key;
        ep.add_peer(&other, Ipv4Addr::new(10, 99, 1, 3), vec!["192.168.9.0/24".into()])
            .await
            .unwrap();
        assert_eq!(
            runner.count_matching("allowed-ips 10.99.1.3/32,192.168.9.0/24 persistent-keepalive 25"),
            1
        );

        ep.remove_peer(&other).await.unwrap();
        assert_eq!(runner.count_matching("remove"), 1);
        ep.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_peer_rejects_bad_key() {
        let dir = TempDir::new().unwrap();
        let (ep, _runner) = endpoint(&dir);
        let err = ep
            .add_peer("short", Ipv4Addr::new(10, 99, 1, 2), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, BurrowError::Key(_)));
        assert!(ep.peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_peer_stats() {
        let dir = TempDir::new().unwrap();
        let (ep, runner) = endpoint(&dir);
        let peer = KeyPair::generate().public_key;
        ep.add_peer(&peer, Ipv4Addr::new(10, 99, 1, 2), vec![])
            .await
            .unwrap();

        assert!(matches!(
            ep.refresh_peer_stats().await,
            Err(EndpointError::NotRunning)
        ));

        ep.start().await.unwrap();
        runner.respond(
            "wg show bws21 dump",
            CommandOutput::ok(format!(
                "priv\tpub\t51821\toff\n{}\t(none)\t198.51.100.7:5000\t10.99.1.2/32\t1700000000\t300\t700\t25\n",
                peer
            )),
        );
        assert_eq!(ep.refresh_peer_stats().await.unwrap(), 1);

        let session = ep.peer(&peer).await.unwrap();
        assert_eq!(session.bytes_received, 300);
        assert_eq!(session.bytes_sent, 700);
        assert_eq!(session.last_handshake, Some(1_700_000_000));
        ep.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_shutdown_on_cancel() {
        let dir = TempDir::new().unwrap();
        let (ep, runner) = endpoint(&dir);
        ep.start().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(ep.run_until_shutdown(cancel).await, ShutdownReason::Cancelled);
        assert_eq!(ep.state(), EndpointState::Stopped);
        assert_eq!(runner.count_matching("ip link del dev bws21"), 2);
    }
}
