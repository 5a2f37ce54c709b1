//! Heartbeat watchdog
//!
//! Polls the liveness file the controller refreshes. A missing file means
//! the controller has not started writing yet; a timestamp older than the
//! stale threshold means it is gone, and the endpoint tears itself down.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use burrow_core::liveness::{read_liveness, Liveness};

/// Why the watchdog loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The heartbeat went stale
    ControllerLost { age: Duration },
    /// The watchdog was cancelled
    Cancelled,
}

/// Watch `path` until it goes stale or `cancel` fires
///
/// The first check happens immediately.
pub async fn watch(
    path: PathBuf,
    stale_after: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> WatchdogOutcome {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        "Watching heartbeat {:?} (stale after {:?}, poll {:?})",
        path,
        stale_after,
        poll_interval
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Heartbeat watchdog cancelled");
                return WatchdogOutcome::Cancelled;
            }
            _ = interval.tick() => {
                match read_liveness(&path, stale_after).await {
                    Ok(Liveness::NotStarted) => {
                        tracing::debug!("No heartbeat received yet");
                    }
                    Ok(Liveness::Alive { age }) => {
                        tracing::trace!("Heartbeat age {:?}", age);
                    }
                    Ok(Liveness::Stale { age }) => {
                        return WatchdogOutcome::ControllerLost { age };
                    }
                    Err(e) => {
                        tracing::warn!("Unreadable heartbeat {:?}: {}", path, e);
                    }
                }
            }
        }
    }
}
