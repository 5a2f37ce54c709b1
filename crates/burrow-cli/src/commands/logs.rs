//! Logs command implementation

use anyhow::Result;

use crate::settings::CliConfig;

/// Print the tail of the remote endpoint's logs
pub async fn logs_command(config: &CliConfig, lines: usize) -> Result<()> {
    let port = super::listen_port(config)?;
    let deployer = super::connect(config).await?;

    let result = deployer.fetch_logs(port, lines).await;
    super::close(&deployer).await;
    let logs = result?;

    for (name, text) in [("server.log", &logs.server), ("engine.log", &logs.engine)] {
        println!("==> {} <==", name);
        if text.is_empty() {
            println!("(empty)");
        } else {
            println!("{}", text);
        }
        println!();
    }
    Ok(())
}
