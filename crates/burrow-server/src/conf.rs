//! Engine configuration file
//!
//! Rendered in the format `wg setconf` reads. Regeneration is deterministic:
//! peers are emitted in tunnel-address order.

use burrow_core::config::EndpointConfig;

use crate::peers::PeerSession;

/// Render the interface and peer sections for `config`
pub fn render(config: &EndpointConfig, peers: &[PeerSession]) -> String {
    let mut out = String::new();
    out.push_str("[Interface]\n");
    out.push_str(&format!("PrivateKey = {}\n", config.private_key.trim()));
    out.push_str(&format!("ListenPort = {}\n", config.listen_port));

    let mut peers: Vec<&PeerSession> = peers.iter().collect();
    peers.sort_by_key(|p| p.client_addr);
    for peer in peers {
        out.push_str("\n[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", peer.public_key));
        out.push_str(&format!("AllowedIPs = {}\n", peer.allowed_ips().join(", ")));
        if let Some(keepalive) = config.keepalive {
            out.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
        }
    }
    out
}
