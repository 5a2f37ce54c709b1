//! Up command implementation
//!
//! Deploys the endpoint, keeps its heartbeat fresh, brings the local tunnel
//! up and holds everything until Ctrl+C or until the endpoint goes away.
//! Teardown runs in reverse order on every exit path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use burrow_client::{ConnectionStats, Credential, LocalConnector};
use burrow_core::config::{ConnectorConfig, EndpointConfig, PeerConfig};
use burrow_core::error::BurrowError;
use burrow_core::exec::{CommandOutput, LocalRunner, RecordingRunner};
use burrow_core::keys::KeyPair;
use burrow_core::network::{allocate_network, NetworkAllocation};
use burrow_deployer::platform::find_binary;
use burrow_deployer::{Deployer, ScriptedRemote, ServerExit};

use crate::output::{format_bytes, format_duration, print_error, print_info, print_success, print_warning};
use crate::settings::CliConfig;

/// How often the endpoint is polled while it starts
const START_POLL: Duration = Duration::from_millis(500);

/// How often transfer statistics are printed
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// How often the session and routed address are checked
const HEALTH_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on a local interface command
const LOCAL_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

type ServerTask = JoinHandle<Result<ServerExit, BurrowError>>;

/// Options for `burrow up`
#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    /// Bring the local tunnel up once the endpoint runs
    pub connect: bool,
    /// Credential for local interface commands
    pub credential: Credential,
    /// Record commands instead of running them
    pub dry_run: bool,
}

/// Deploy, start and attach to a tunnel until `cancel` fires
pub async fn up_command(config: &CliConfig, options: UpOptions, cancel: CancellationToken) -> Result<()> {
    let allocation = allocate_network(config.tunnel.client_id)
        .with_context(|| format!("Invalid client id {}", config.tunnel.client_id))?;
    let server_keys = KeyPair::generate();
    let client_keys = KeyPair::generate();
    let endpoint = endpoint_config(config, &allocation, &server_keys, &client_keys);
    let connector = connector_config(config, &allocation, &server_keys, &client_keys);

    if options.dry_run {
        return dry_run(config, &endpoint, connector, &options).await;
    }

    let deployer = Arc::new(super::connect(config).await?);
    let result = run_tunnel(&deployer, &endpoint, connector, &options, &cancel).await;
    super::close(&deployer).await;
    result
}

fn endpoint_config(
    config: &CliConfig,
    allocation: &NetworkAllocation,
    server_keys: &KeyPair,
    client_keys: &KeyPair,
) -> EndpointConfig {
    let mut endpoint = EndpointConfig::for_allocation(allocation, server_keys, &config.deployer.work_dir);
    endpoint.routed_addrs = config.tunnel.routed_addrs.clone();
    endpoint.egress_interface = config.tunnel.egress_interface.clone();
    endpoint.keepalive = config.tunnel.keepalive;
    endpoint.peers.push(PeerConfig {
        public_key: client_keys.public_key.clone(),
        client_addr: allocation.client_addr,
        allowed_subnets: vec![],
    });
    endpoint
}

fn connector_config(
    config: &CliConfig,
    allocation: &NetworkAllocation,
    server_keys: &KeyPair,
    client_keys: &KeyPair,
) -> ConnectorConfig {
    let mut connector = ConnectorConfig::for_allocation(
        allocation,
        client_keys,
        &server_keys.public_key,
        &config.deployer.host,
    );
    connector.routed_addrs = config.tunnel.routed_addrs.clone();
    connector.config_dir = config.tunnel.config_dir.clone();
    connector.keepalive = config.tunnel.keepalive;
    connector
}

async fn run_tunnel(
    deployer: &Arc<Deployer>,
    endpoint: &EndpointConfig,
    connector: ConnectorConfig,
    options: &UpOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    print_info(&format!("Preparing {}...", deployer.host()));
    let engine = deployer
        .ensure_dependency_installed()
        .await
        .context("No tunnel engine available on the remote host")?;
    print_success(&format!("Tunnel engine ready: {}", engine));

    let deployed = deployer.deploy(endpoint).await.context("Deploy failed")?;
    print_success(&format!("Deployed {} to {}", deployed.process_name, deployed.work_dir));

    // The endpoint watches the heartbeat from the moment it starts
    deployer.start_heartbeat(&deployed.work_dir).await?;

    let server_cancel = cancel.child_token();
    let mut server: ServerTask = {
        let deployer = Arc::clone(deployer);
        let deployed = deployed.clone();
        let token = server_cancel.clone();
        tokio::spawn(async move { deployer.start_server(&deployed, None, token).await })
    };
    let mut exit = None;

    let outcome = attach(deployer, endpoint, connector, options, &mut server, &mut exit, cancel).await;

    server_cancel.cancel();
    let exit = match exit {
        Some(exit) => exit,
        None => join(server.await),
    };
    if let Some(beats) = deployer.stop_heartbeat().await {
        tracing::debug!("{} heartbeats written", beats);
    }

    match exit {
        Ok(ServerExit::Cancelled) => print_success("Endpoint stopped"),
        Ok(ServerExit::Exited) => {
            print_warning("Endpoint exited on its own; see `burrow logs` for why")
        }
        Err(e) if outcome.is_ok() => return Err(e.context("Endpoint failed")),
        Err(e) => print_error(&format!("Endpoint failed: {:#}", e)),
    }
    outcome
}

fn join(res: Result<Result<ServerExit, BurrowError>, tokio::task::JoinError>) -> Result<ServerExit> {
    Ok(res.context("Endpoint task failed")??)
}

/// Wait for the endpoint, connect locally and hold until told to stop
async fn attach(
    deployer: &Deployer,
    endpoint: &EndpointConfig,
    connector_config: ConnectorConfig,
    options: &UpOptions,
    server: &mut ServerTask,
    exit: &mut Option<Result<ServerExit>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let port = endpoint.listen_port;
    let mut poll = tokio::time::interval(START_POLL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = &mut *server, if exit.is_none() => {
                *exit = Some(join(res));
                return Ok(());
            }
            _ = poll.tick() => {
                match deployer.get_server_status(port).await {
                    Ok(status) if status.running() => break,
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Status check failed: {}", e),
                }
            }
        }
    }
    print_success(&format!("Endpoint running on {}:{}", deployer.host(), port));

    let connector = if options.connect {
        let runner = Arc::new(LocalRunner::with_timeout(LOCAL_COMMAND_TIMEOUT));
        let connector = LocalConnector::new(connector_config, runner);
        connector
            .connect(&options.credential)
            .await
            .context("Failed to bring up the local tunnel")?;
        print_success(&format!(
            "Local tunnel {} up ({} via {})",
            connector.interface_name(),
            connector.config().allowed_ips().join(", "),
            connector.config().server_endpoint()
        ));
        Some(connector)
    } else {
        None
    };

    let result = hold(deployer, connector.as_ref(), server, exit, cancel).await;

    if let Some(connector) = &connector {
        match connector.disconnect(&options.credential).await {
            Ok(()) => print_success("Local tunnel down"),
            Err(e) => print_warning(&format!("Local tunnel teardown: {}", e)),
        }
    }
    result
}

async fn hold(
    deployer: &Deployer,
    connector: Option<&LocalConnector>,
    server: &mut ServerTask,
    exit: &mut Option<Result<ServerExit>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut samples: BoxStream<'static, ConnectionStats> = match connector {
        Some(connector) => connector.monitor(STATS_INTERVAL, cancel.clone()).boxed(),
        None => stream::pending().boxed(),
    };
    let mut health = tokio::time::interval(HEALTH_INTERVAL);
    health.tick().await;

    print_info("Tunnel up; press Ctrl+C to tear it down");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                print_info("Shutting down...");
                return Ok(());
            }
            res = &mut *server, if exit.is_none() => {
                *exit = Some(join(res));
                return Ok(());
            }
            Some(sample) = samples.next() => {
                print_info(&format!(
                    "up {}, sent {}, received {}",
                    sample.uptime().map(format_duration).unwrap_or_else(|| "-".to_string()),
                    format_bytes(sample.bytes_sent),
                    format_bytes(sample.bytes_received)
                ));
            }
            _ = health.tick() => {
                let report = deployer.check_health().await?;
                if !report.session_alive {
                    anyhow::bail!("Lost the session to {}", deployer.host());
                }
                if let Some(probe) = report.probe.filter(|p| !p.reachable) {
                    print_warning(&format!("{} is not reachable from {}", probe.addr, deployer.host()));
                }
            }
        }
    }
}

/// Walk the deployment against a scripted host and a recording runner,
/// then print what would have run
async fn dry_run(
    config: &CliConfig,
    endpoint: &EndpointConfig,
    mut connector_config: ConnectorConfig,
    options: &UpOptions,
) -> Result<()> {
    let remote = Arc::new(ScriptedRemote::new(config.deployer.host.clone()));
    remote.runner().respond("uname", CommandOutput::ok("Linux\nx86_64\n"));
    let deployer = Deployer::with_session(config.deployer.clone(), remote.clone());

    let platform = deployer.platform().await?;
    let engine = deployer.ensure_dependency_installed().await?;
    let binary = match find_binary(&config.deployer.artifacts_dir, &platform)? {
        Some(path) => path.display().to_string(),
        None => format!("built locally for {}", platform.target_triple().unwrap_or("?")),
    };

    let scratch = std::env::temp_dir().join(format!("burrow-dry-run-{}", std::process::id()));
    connector_config.config_dir = scratch.clone();
    connector_config.settle_delay = Duration::ZERO;
    let local = Arc::new(RecordingRunner::new());
    let connector = LocalConnector::new(connector_config, local.clone());
    if options.connect {
        connector.connect(&options.credential).await?;
        connector.disconnect(&options.credential).await?;
    }
    if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
        tracing::debug!("Removing {:?}: {}", scratch, e);
    }

    println!("Host:       {} (assumed {})", deployer.host(), platform);
    println!("Engine:     {}", engine);
    println!("Endpoint:   {}", binary);
    println!(
        "Tunnel:     {} port {}, endpoint {}, client {}",
        endpoint.vpn_subnet,
        endpoint.listen_port,
        endpoint.server_addr,
        connector.config().client_addr
    );
    println!();
    println!("Remote commands:");
    for command in remote.commands() {
        println!("  {}", command);
    }
    if options.connect {
        println!();
        println!("Local commands:");
        for command in local.commands() {
            println!("  {}", command);
        }
    }
    Ok(())
}
