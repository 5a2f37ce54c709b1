//! Stop command implementation

use anyhow::Result;

use burrow_deployer::StopOutcome;

use crate::output::{print_success, print_warning};
use crate::settings::CliConfig;

/// Stop the remote endpoint for the configured tunnel
pub async fn stop_command(config: &CliConfig) -> Result<()> {
    let port = super::listen_port(config)?;
    let deployer = super::connect(config).await?;

    let result = deployer.stop_server(port).await;
    super::close(&deployer).await;

    match result? {
        StopOutcome::NotRunning => print_warning(&format!("No endpoint running for port {}", port)),
        StopOutcome::Terminated => print_success(&format!("Endpoint for port {} stopped", port)),
        StopOutcome::Killed => print_warning(&format!(
            "Endpoint for port {} did not exit in time and was killed",
            port
        )),
    }
    Ok(())
}
