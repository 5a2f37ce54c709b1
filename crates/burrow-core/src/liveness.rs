//! Liveness file protocol
//!
//! The deployer refreshes a small file on the remote host with a Unix
//! timestamp; the endpoint reads it back with its own clock. The file is the
//! only channel between the two, so either side can crash, restart or live
//! on another host without in-memory coordination.
//!
//! A missing file means the controller has not started beating yet. A
//! timestamp older than [`STALE_AFTER`] means the controller is gone.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::exec::quote;
use crate::time::age_of;

/// How often the deployer refreshes the file by default
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How often the endpoint checks the file
pub const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Age beyond which the controller is considered lost
pub const STALE_AFTER: Duration = Duration::from_secs(12);

/// Default file name inside the endpoint work directory
pub const HEARTBEAT_FILE_NAME: &str = "heartbeat";

/// What the endpoint concluded from one read of the liveness file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No file yet: the controller has not started its heartbeat
    NotStarted,
    /// Fresh enough
    Alive { age: Duration },
    /// Older than the staleness threshold
    Stale { age: Duration },
}

impl Liveness {
    /// Classify a timestamp against `stale_after`
    pub fn classify(timestamp_secs: u64, stale_after: Duration) -> Self {
        let age = age_of(timestamp_secs);
        if age > stale_after {
            Liveness::Stale { age }
        } else {
            Liveness::Alive { age }
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Liveness::Stale { .. })
    }
}

/// Parse the single-line file body
pub fn parse_timestamp(contents: &str) -> Option<u64> {
    contents.lines().next()?.trim().parse().ok()
}

/// Read and classify the liveness file at `path`
///
/// An unreadable or unparsable body is reported as an error so the caller
/// can log it; it is never treated as stale on its own.
pub async fn read_liveness(path: &Path, stale_after: Duration) -> io::Result<Liveness> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let ts = parse_timestamp(&contents).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed heartbeat line: {:?}", contents.trim()),
                )
            })?;
            Ok(Liveness::classify(ts, stale_after))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Liveness::NotStarted),
        Err(e) => Err(e),
    }
}

/// Write `timestamp_secs` to `path` atomically (write temp, rename)
pub async fn write_timestamp(path: &Path, timestamp_secs: u64) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, format!("{}\n", timestamp_secs)).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Shell line that stamps `path` with the executing host's clock
///
/// Uses the remote clock so the endpoint compares like with like.
pub fn stamp_command(path: &str) -> String {
    let tmp = format!("{}.tmp", path);
    format!(
        "date +%s > {tmp} && mv -f {tmp} {path}",
        tmp = quote(&tmp),
        path = quote(path)
    )
}
