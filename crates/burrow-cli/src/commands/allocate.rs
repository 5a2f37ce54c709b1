//! Allocate command implementation

use anyhow::{Context, Result};

use burrow_core::network::allocate_network;

use crate::output::format_allocation;

/// Print the addresses and port derived from `client_id`
pub fn allocate_command(client_id: u32, json: bool) -> Result<()> {
    let allocation = allocate_network(client_id)?;

    if json {
        let text = serde_json::to_string_pretty(&allocation).context("Failed to encode allocation")?;
        println!("{}", text);
    } else {
        println!("{}", format_allocation(&allocation));
    }
    Ok(())
}
