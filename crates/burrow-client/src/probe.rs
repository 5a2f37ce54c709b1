//! Reachability diagnostics through the tunnel

use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use burrow_core::exec::{quote, CommandRunner};

use crate::error::ConnectorError;

fn probe_err(target: &str, detail: impl ToString) -> ConnectorError {
    ConnectorError::Probe {
        target: target.to_string(),
        detail: detail.to_string(),
    }
}

/// Parse the round trip from `ping` output (`time=1.23 ms`)
pub fn parse_rtt(output: &str) -> Option<Duration> {
    let start = output.find("time=")? + "time=".len();
    let value: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let millis: f64 = value.parse().ok()?;
    Some(Duration::from_micros((millis * 1000.0) as u64))
}

/// Send one ICMP echo to `addr`
pub async fn ping(
    runner: &dyn CommandRunner,
    addr: &str,
    timeout: Duration,
) -> Result<Duration, ConnectorError> {
    let wait = timeout.as_secs().max(1);
    let command = format!("ping -c 1 -W {} {}", wait, quote(addr));
    let started = Instant::now();
    let out = tokio::time::timeout(timeout, runner.run(&command))
        .await
        .map_err(|_| probe_err(addr, format!("no reply within {:?}", timeout)))??;
    if !out.success() {
        return Err(probe_err(addr, out.stderr.trim().to_string() + out.stdout.trim()));
    }
    Ok(parse_rtt(&out.stdout).unwrap_or_else(|| started.elapsed()))
}

/// Open (and close) a TCP connection to `addr`
pub async fn dial_tcp(addr: &str, timeout: Duration) -> Result<Duration, ConnectorError> {
    let started = Instant::now();
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| probe_err(addr, format!("connect timed out after {:?}", timeout)))?
        .map_err(|e| probe_err(addr, e))?;
    drop(stream);
    Ok(started.elapsed())
}

/// Resolve `host` to its addresses
pub async fn resolve(host: &str, timeout: Duration) -> Result<Vec<IpAddr>, ConnectorError> {
    let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((host, 0)))
        .await
        .map_err(|_| probe_err(host, format!("lookup timed out after {:?}", timeout)))?
        .map_err(|e| probe_err(host, e))?;

    let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
    ips.dedup();
    if ips.is_empty() {
        return Err(probe_err(host, "no addresses"));
    }
    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::exec::{CommandOutput, RecordingRunner};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_rtt() {
        let out = "64 bytes from 10.99.1.1: icmp_seq=1 ttl=64 time=1.25 ms\n";
        assert_eq!(parse_rtt(out), Some(Duration::from_micros(1250)));
        assert_eq!(parse_rtt("no reply"), None);
    }

    #[tokio::test]
    async fn test_ping_reports_rtt() {
        let runner = RecordingRunner::new();
        runner.respond(
            "ping -c 1 -W 2 10.99.1.1",
            CommandOutput::ok("64 bytes from 10.99.1.1: icmp_seq=1 ttl=64 time=3 ms\n"),
        );
        let rtt = ping(&runner, "10.99.1.1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(rtt, Duration::from_millis(3));
    }

    #[tokio::test]
    async fn test_ping_failure() {
        let runner = RecordingRunner::new();
        runner.respond("ping", CommandOutput::failed(1, "100% packet loss"));
        let err = ping(&runner, "10.99.1.1", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Probe { .. }));
    }

    #[tokio::test]
    async fn test_dial_tcp_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(dial_tcp(&addr, Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let ips = resolve("127.0.0.1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(ips, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }
}
