//! Status command implementation

use anyhow::Result;

use burrow_core::network::{interface_name, Side};

use crate::output::{format_status, print_info};
use crate::settings::CliConfig;

/// Show the remote endpoint's process, heartbeat and session health
pub async fn status_command(config: &CliConfig) -> Result<()> {
    let port = super::listen_port(config)?;
    let deployer = super::connect(config).await?;

    let result = async {
        let status = deployer.get_server_status(port).await?;
        let health = deployer.check_health().await?;
        Ok::<_, anyhow::Error>((status, health))
    }
    .await;
    super::close(&deployer).await;
    let (status, health) = result?;

    println!("{}", format_status(deployer.host(), &status, &health));

    let local = config
        .tunnel
        .config_dir
        .join(format!("{}.conf", interface_name(Side::Connector, port)));
    if local.exists() {
        print_info(&format!("Local tunnel config present: {}", local.display()));
    }
    Ok(())
}
