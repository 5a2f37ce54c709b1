//! Heartbeat emission
//!
//! Refreshes the endpoint's liveness file on a fixed cadence. The emitter
//! never learns whether the endpoint is alive; the endpoint compares the
//! timestamp against its own clock and tears itself down when it goes stale.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use burrow_core::liveness::stamp_command;

use crate::transport::RemoteExec;

/// A running heartbeat task
pub struct HeartbeatEmitter {
    path: String,
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

impl HeartbeatEmitter {
    /// Start stamping `path` every `interval`; the first stamp is immediate
    pub fn start(exec: Arc<dyn RemoteExec>, path: String, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let command = stamp_command(&path);
        let target = path.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut beats: u64 = 0;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match exec.run(&command).await {
                            Ok(out) if out.success() => {
                                beats += 1;
                                tracing::trace!("Heartbeat #{} written to {}", beats, target);
                            }
                            Ok(out) => {
                                tracing::warn!("Heartbeat write failed: {}", out.stderr.trim());
                            }
                            Err(e) => tracing::warn!("Heartbeat write failed: {}", e),
                        }
                    }
                }
            }
            beats
        });

        tracing::info!("Heartbeat started: {} every {:?}", path, interval);
        Self { path, cancel, task }
    }

    /// Remote file being refreshed
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stop the task, returning how many stamps succeeded
    pub async fn stop(self) -> u64 {
        self.cancel.cancel();
        match self.task.await {
            Ok(beats) => {
                tracing::info!("Heartbeat stopped after {} beats", beats);
                beats
            }
            Err(e) => {
                tracing::warn!("Heartbeat task failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedRemote;
    use burrow_core::exec::CommandOutput;

    #[tokio::test(start_paused = true)]
    async fn test_emits_until_stopped() {
        let remote = Arc::new(ScriptedRemote::new("box"));
        let emitter = HeartbeatEmitter::start(
            remote.clone(),
            "/tmp/burrow/51821/heartbeat".to_string(),
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_millis(11_000)).await;
        let beats = emitter.stop().await;

        // t=0, t=5, t=10
        assert_eq!(beats, 3);
        assert_eq!(remote.runner().count_matching("date +%s > /tmp/burrow/51821/heartbeat.tmp"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_writes_are_not_counted() {
        let remote = Arc::new(ScriptedRemote::new("box"));
        remote
            .runner()
            .respond("date", CommandOutput::failed(1, "Read-only file system"));
        let emitter = HeartbeatEmitter::start(remote.clone(), "/ro/heartbeat".to_string(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(emitter.stop().await, 0);
        assert_eq!(remote.runner().count_matching("date"), 3);
    }

    #[tokio::test]
    async fn test_counters_are_per_instance() {
        let remote = Arc::new(ScriptedRemote::new("box"));
        let a = HeartbeatEmitter::start(remote.clone(), "/a/heartbeat".to_string(), Duration::from_secs(60));
        let b = HeartbeatEmitter::start(remote.clone(), "/b/heartbeat".to_string(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.path(), "/a/heartbeat");
        assert_eq!(a.stop().await, 1);
        assert_eq!(b.stop().await, 1);
    }
}
