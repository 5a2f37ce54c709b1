//! An endpoint and a connector wired to each other through recording runners

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use burrow_client::{Credential, LocalConnector};
use burrow_core::config::{ConnectorConfig, EndpointConfig};
use burrow_core::exec::{CommandOutput, RecordingRunner};
use burrow_core::keys::KeyPair;
use burrow_core::network::allocate_network;
use burrow_core::types::{EndpointState, EngineKind};
use burrow_server::TunnelEndpoint;

#[tokio::test]
async fn test_connect_monitor_disconnect() {
    let remote_dir = TempDir::new().unwrap();
    let local_dir = TempDir::new().unwrap();
    let allocation = allocate_network(1).unwrap();
    let server_keys = KeyPair::generate();
    let client_keys = KeyPair::generate();

    let mut endpoint_config =
        EndpointConfig::for_allocation(&allocation, &server_keys, &remote_dir.path().to_string_lossy());
    endpoint_config.engine = Some(EngineKind::Kernel);
    endpoint_config.heartbeat_file = None;
    assert_eq!(endpoint_config.listen_port, 51821);
    assert_eq!(endpoint_config.vpn_subnet, "10.99.1.0/24");

    let server_runner = Arc::new(RecordingRunner::new());
    let endpoint = TunnelEndpoint::new(endpoint_config, server_runner.clone());
    endpoint.start().await.unwrap();
    assert_eq!(endpoint.state(), EndpointState::Running);
    endpoint
        .add_peer(&client_keys.public_key, allocation.client_addr, vec![])
        .await
        .unwrap();
    assert_eq!(server_runner.count_matching("wg set bws21 peer"), 1);

    let mut connector_config = ConnectorConfig::for_allocation(
        &allocation,
        &client_keys,
        &server_keys.public_key,
        "203.0.113.7",
    );
    connector_config.config_dir = local_dir.path().to_path_buf();
    connector_config.settle_delay = Duration::ZERO;

    let client_runner = Arc::new(RecordingRunner::new());
    client_runner.respond(
        "wg show bwc21 transfer",
        CommandOutput::ok(format!("{}\t4096\t1024\n", server_keys.public_key)),
    );
    let connector = LocalConnector::new(connector_config, client_runner.clone());

    connector.connect(&Credential::Root).await.unwrap();
    assert!(connector.is_connected());
    let conf_path = connector.config().config_path();
    let conf = std::fs::read_to_string(&conf_path).unwrap();
    assert!(conf.contains(&format!("PublicKey = {}", server_keys.public_key)));
    assert!(conf.contains("Endpoint = 203.0.113.7:51821"));
    assert!(conf.contains("Address = 10.99.1.2/32"));

    let interval = Duration::from_millis(200);
    let mut samples = Box::pin(connector.monitor(interval, CancellationToken::new()));
    let sample = tokio::time::timeout(interval, samples.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sample.bytes_received, 4096);
    assert_eq!(sample.bytes_sent, 1024);
    assert!(sample.connected_at.is_some());

    connector.disconnect(&Credential::Root).await.unwrap();
    assert!(!connector.is_connected());
    assert!(!conf_path.exists());
    assert_eq!(client_runner.count_matching("wg-quick down"), 1);

    endpoint.stop().await.unwrap();
    assert_eq!(endpoint.state(), EndpointState::Stopped);
}
