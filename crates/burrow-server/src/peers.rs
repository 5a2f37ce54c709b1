//! Registered peer table

use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use burrow_core::error::EndpointError;
use burrow_core::time::current_time_secs;

/// A peer registered with the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSession {
    pub public_key: String,
    pub client_addr: Ipv4Addr,
    pub allowed_subnets: Vec<String>,
    /// Registration time (Unix seconds)
    pub connected_at: u64,
    /// Latest completed handshake (Unix seconds)
    pub last_handshake: Option<u64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl PeerSession {
    pub fn new(public_key: String, client_addr: Ipv4Addr, allowed_subnets: Vec<String>) -> Self {
        Self {
            public_key,
            client_addr,
            allowed_subnets,
            connected_at: current_time_secs(),
            last_handshake: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Addresses the engine routes to this peer
    pub fn allowed_ips(&self) -> Vec<String> {
        let mut ips = vec![format!("{}/32", self.client_addr)];
        ips.extend(self.allowed_subnets.iter().cloned());
        ips
    }
}

/// Counters for one peer as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStats {
    pub public_key: String,
    pub last_handshake: Option<u64>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Parse the peer lines of `wg show <if> dump`
///
/// The first line describes the interface and is skipped. Peer lines are
/// tab separated: key, preshared key, endpoint, allowed ips, latest
/// handshake, rx bytes, tx bytes, keepalive. Malformed lines are ignored.
pub fn parse_dump(dump: &str) -> Vec<PeerStats> {
    dump.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 8 {
                return None;
            }
            let handshake: u64 = fields[4].parse().ok()?;
            Some(PeerStats {
                public_key: fields[0].to_string(),
                last_handshake: (handshake > 0).then_some(handshake),
                bytes_received: fields[5].parse().ok()?,
                bytes_sent: fields[6].parse().ok()?,
            })
        })
        .collect()
}

/// Peers keyed by public key, behind a single reader/writer lock
#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<String, PeerSession>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer; an existing registration is left untouched
    pub async fn insert(&self, session: PeerSession) -> Result<(), EndpointError> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&session.public_key) {
            return Err(EndpointError::DuplicatePeer(session.public_key));
        }
        peers.insert(session.public_key.clone(), session);
        Ok(())
    }

    pub async fn remove(&self, public_key: &str) -> Result<PeerSession, EndpointError> {
        self.peers
            .write()
            .await
            .remove(public_key)
            .ok_or_else(|| EndpointError::PeerNotFound(public_key.to_string()))
    }

    pub async fn get(&self, public_key: &str) -> Option<PeerSession> {
        self.peers.read().await.get(public_key).cloned()
    }

    /// All peers, ordered by tunnel address
    pub async fn list(&self) -> Vec<PeerSession> {
        let mut peers: Vec<_> = self.peers.read().await.values().cloned().collect();
        peers.sort_by_key(|p| p.client_addr);
        peers
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Fold engine counters into the matching sessions
    ///
    /// Returns how many sessions were updated. Unknown keys are ignored.
    pub async fn apply_stats(&self, stats: &[PeerStats]) -> usize {
        let mut peers = self.peers.write().await;
        let mut updated = 0;
        for stat in stats {
            if let Some(session) = peers.get_mut(&stat.public_key) {
                session.last_handshake = stat.last_handshake;
                session.bytes_received = stat.bytes_received;
                session.bytes_sent = stat.bytes_sent;
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(key: &str, last_octet: u8, subnets: &[&str]) -> PeerSession {
        PeerSession::new(
            key.to_string(),
            Ipv4Addr::new(10, 99, 1, last_octet),
            subnets.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_original() {
        let table = PeerTable::new();
        table
            .insert(session("key-a", 2, &["192.168.1.0/24"]))
            .await
            .unwrap();

        let err = table
            .insert(session("key-a", 3, &["172.16.0.0/16"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::DuplicatePeer(ref k) if k == "key-a"));

        let existing = table.get("key-a").await.unwrap();
        assert_eq!(existing.allowed_subnets, vec!["192.168.1.0/24".to_string()]);
        assert_eq!(existing.client_addr, Ipv4Addr::new(10, 99, 1, 2));
    }

    #[tokio::test]
    async fn test_remove_missing_peer() {
        let table = PeerTable::new();
        let err = table.remove("nobody").await.unwrap_err();
        assert!(matches!(err, EndpointError::PeerNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_ordered() {
        let table = PeerTable::new();
        table.insert(session("b", 9, &[])).await.unwrap();
        table.insert(session("a", 3, &[])).await.unwrap();
        let keys: Vec<_> = table.list().await.into_iter().map(|p| p.public_key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_allowed_ips_include_client_host_route() {
        let s = session("k", 2, &["192.168.1.0/24"]);
        assert_eq!(s.allowed_ips(), vec!["10.99.1.2/32", "192.168.1.0/24"]);
    }

    #[test]
    fn test_parse_dump() {
        let dump = "privkey\tpubkey\t51821\toff\n\
                    peerA\t(none)\t198.51.100.7:40000\t10.99.1.2/32\t1700000000\t1024\t2048\t25\n\
                    peerB\t(none)\t(none)\t10.99.1.3/32\t0\t0\t0\toff\n\
                    garbage line\n";
        let stats = parse_dump(dump);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].public_key, "peerA");
        assert_eq!(stats[0].last_handshake, Some(1_700_000_000));
        assert_eq!(stats[0].bytes_received, 1024);
        assert_eq!(stats[0].bytes_sent, 2048);
        assert_eq!(stats[1].last_handshake, None);
    }

    #[tokio::test]
    async fn test_apply_stats_updates_known_peers() {
        let table = PeerTable::new();
        table.insert(session("peerA", 2, &[])).await.unwrap();

        let updated = table
            .apply_stats(&[
                PeerStats {
                    public_key: "peerA".to_string(),
                    last_handshake: Some(5),
                    bytes_received: 10,
                    bytes_sent: 20,
                },
                PeerStats {
                    public_key: "stranger".to_string(),
                    last_handshake: None,
                    bytes_received: 1,
                    bytes_sent: 1,
                },
            ])
            .await;
        assert_eq!(updated, 1);

        let peer = table.get("peerA").await.unwrap();
        assert_eq!(peer.bytes_sent, 20);
        assert_eq!(peer.last_handshake, Some(5));
    }
}
