//! Local interface configuration file
//!
//! Written in the format `wg-quick` reads. The address is a host address and
//! the allowed list holds host routes only, so bringing the tunnel up never
//! shadows an unrelated local route.

use burrow_core::config::ConnectorConfig;

/// Render the `wg-quick` file for `config`
pub fn render(config: &ConnectorConfig) -> String {
    let mut out = String::new();
    out.push_str("[Interface]\n");
    out.push_str(&format!("PrivateKey = {}\n", config.private_key.trim()));
    out.push_str(&format!("Address = {}/32\n", config.client_addr));
    out.push_str("\n[Peer]\n");
    out.push_str(&format!("PublicKey = {}\n", config.server_public_key.trim()));
    out.push_str(&format!("Endpoint = {}\n", config.server_endpoint()));
    out.push_str(&format!("AllowedIPs = {}\n", config.allowed_ips().join(", ")));
    if let Some(keepalive) = config.keepalive {
        out.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
    }
    out
}
