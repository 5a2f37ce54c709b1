//! Local build-and-upload of the userspace engine
//!
//! The last resort for hosts that can neither install packages nor build
//! from source: cross-compile the engine on this machine and copy it over
//! the existing session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use burrow_core::exec::{quote, CommandRunner, LocalRunner};
use burrow_core::install::{InstallStrategy, USERSPACE_ENGINE};
use burrow_core::types::{EngineKind, Platform};

use crate::transport::RemoteExec;

const BUILD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Build the engine from a local checkout and upload it
pub struct LocalBuildUpload {
    exec: Arc<dyn RemoteExec>,
    source_dir: Option<PathBuf>,
    platform: Platform,
    remote_path: String,
}

impl LocalBuildUpload {
    pub fn new(
        exec: Arc<dyn RemoteExec>,
        source_dir: Option<PathBuf>,
        platform: Platform,
        remote_dir: &str,
    ) -> Self {
        Self {
            exec,
            source_dir,
            platform,
            remote_path: format!("{}/{}", remote_dir.trim_end_matches('/'), USERSPACE_ENGINE),
        }
    }
}

#[async_trait]
impl InstallStrategy for LocalBuildUpload {
    fn name(&self) -> &str {
        "local-build"
    }

    async fn attempt(&self, runner: &dyn CommandRunner) -> Result<EngineKind> {
        // The engine alone cannot configure peers
        if !runner.run("command -v wg").await?.success() {
            bail!("`wg` not found on the remote PATH");
        }

        let Some(source_dir) = &self.source_dir else {
            bail!("no local engine source directory configured");
        };
        let Some(goarch) = self.platform.go_arch() else {
            bail!("no Go architecture for {}", self.platform);
        };

        let output = source_dir.join(format!("{}-linux-{}", USERSPACE_ENGINE, goarch));
        let command = format!(
            "cd {} && CGO_ENABLED=0 GOOS=linux GOARCH={} go build -o {} .",
            quote(&source_dir.to_string_lossy()),
            goarch,
            quote(&output.to_string_lossy())
        );
        LocalRunner::with_timeout(BUILD_TIMEOUT)
            .check(&command)
            .await
            .context("local engine build failed")?;

        let binary = tokio::fs::read(&output)
            .await
            .with_context(|| format!("reading {}", output.display()))?;
        self.exec
            .upload(&binary, &self.remote_path, 0o755)
            .await
            .context("uploading engine")?;

        Ok(EngineKind::Userspace {
            binary: PathBuf::from(&self.remote_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedRemote;
    use burrow_core::exec::CommandOutput;

    #[tokio::test]
    async fn test_requires_wg_tool() {
        let remote = Arc::new(ScriptedRemote::new("box"));
        remote
            .runner()
            .respond("command -v wg", CommandOutput::failed(1, ""));
        let strategy = LocalBuildUpload::new(
            remote.clone(),
            Some(PathBuf::from("/src/wireguard-go")),
            Platform::from_uname("Linux", "x86_64"),
            "/tmp/burrow",
        );

        let err = strategy.attempt(remote.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("wg"));
    }

    #[tokio::test]
    async fn test_requires_source_dir() {
        let remote = Arc::new(ScriptedRemote::new("box"));
        let strategy = LocalBuildUpload::new(
            remote.clone(),
            None,
            Platform::from_uname("Linux", "x86_64"),
            "/tmp/burrow",
        );

        let err = strategy.attempt(remote.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("source directory"));
        assert!(remote.file("/tmp/burrow/wireguard-go").is_none());
    }
}
