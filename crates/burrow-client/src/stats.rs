//! Connection state and transfer statistics

use std::time::Duration;

use burrow_core::time::current_time_secs;

/// State of the local tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    /// Unix seconds of the last successful connect
    pub connected_at: Option<u64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One statistics sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connected_at: Option<u64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Unix seconds when the sample was taken
    pub sampled_at: u64,
}

impl ConnectionStats {
    pub fn from_state(state: &ConnectionState) -> Self {
        Self {
            connected_at: state.connected_at,
            bytes_sent: state.bytes_sent,
            bytes_received: state.bytes_received,
            sampled_at: current_time_secs(),
        }
    }

    /// How long the tunnel has been up at sample time
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at
            .map(|at| Duration::from_secs(self.sampled_at.saturating_sub(at)))
    }
}

/// Sum `wg show <iface> transfer` output into `(received, sent)`
///
/// Each line is `<peer key>\t<rx bytes>\t<tx bytes>`; malformed lines are
/// skipped.
pub fn parse_transfer(output: &str) -> (u64, u64) {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace().skip(1);
            let rx = fields.next()?.parse::<u64>().ok()?;
            let tx = fields.next()?.parse::<u64>().ok()?;
            Some((rx, tx))
        })
        .fold((0, 0), |(rx, tx), (r, t)| (rx + r, tx + t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer_sums_peers() {
        let out = "peerA=\t1024\t2048\npeerB=\t1\t2\n";
        assert_eq!(parse_transfer(out), (1025, 2050));
    }

    #[test]
    fn test_parse_transfer_skips_garbage() {
        assert_eq!(parse_transfer(""), (0, 0));
        assert_eq!(parse_transfer("peer\tx\ty\nshort\n"), (0, 0));
    }

    #[test]
    fn test_uptime() {
        let stats = ConnectionStats {
            connected_at: Some(100),
            bytes_sent: 0,
            bytes_received: 0,
            sampled_at: 160,
        };
        assert_eq!(stats.uptime(), Some(Duration::from_secs(60)));
    }
}
