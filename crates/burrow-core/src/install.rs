//! Tunnel engine installation strategies
//!
//! Hosts range from stock images with native kernel support to hardened
//! appliances that lack it by design, so the engine is located through an
//! ordered chain of strategies. The first success wins; a failure is logged
//! and the next strategy runs. Only when every strategy has failed does the
//! caller see an error, carrying each strategy's reason.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::command::{NetCommand, Privilege};
use crate::exec::{quote, CommandRunner};
use crate::types::EngineKind;

/// Name of the userspace engine binary
pub const USERSPACE_ENGINE: &str = "wireguard-go";

/// Upstream source of the userspace engine
pub const DEFAULT_ENGINE_SOURCE: &str = "https://git.zx2c4.com/wireguard-go";

/// Upstream source of the interface configuration tool
pub const DEFAULT_TOOLS_SOURCE: &str = "https://git.zx2c4.com/wireguard-tools";

/// Throwaway interface used to probe kernel support
const PROBE_INTERFACE: &str = "bwprobe0";

/// One way of making the tunnel engine available
#[async_trait]
pub trait InstallStrategy: Send + Sync {
    /// Short name used in logs and error reports
    fn name(&self) -> &str;

    /// Try to make the engine available, returning how it is provided
    async fn attempt(&self, runner: &dyn CommandRunner) -> Result<EngineKind>;
}

/// Run `strategies` in order until one succeeds
///
/// On exhaustion returns one `"<name>: <reason>"` line per strategy.
pub async fn resolve_engine(
    runner: &dyn CommandRunner,
    strategies: &[Box<dyn InstallStrategy>],
) -> std::result::Result<EngineKind, Vec<String>> {
    let mut attempts = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        tracing::debug!("Trying engine strategy '{}'", strategy.name());
        match strategy.attempt(runner).await {
            Ok(kind) => {
                tracing::info!("Tunnel engine available via {}: {}", strategy.name(), kind);
                return Ok(kind);
            }
            Err(e) => {
                tracing::warn!("Engine strategy '{}' failed: {:#}", strategy.name(), e);
                attempts.push(format!("{}: {:#}", strategy.name(), e));
            }
        }
    }

    Err(attempts)
}

/// The standard chain: kernel probe, existing binary, package manager,
/// then a source build into `work_dir`
pub fn default_chain(privilege: Privilege, work_dir: &str) -> Vec<Box<dyn InstallStrategy>> {
    vec![
        Box::new(KernelProbe::new(privilege)),
        Box::new(ExistingBinary::new(vec![format!(
            "{}/{}",
            work_dir.trim_end_matches('/'),
            USERSPACE_ENGINE
        )])),
        Box::new(PackageManager::new(privilege, work_dir)),
        Box::new(SourceBuild::new(privilege, work_dir)),
    ]
}

async fn require_tool(runner: &dyn CommandRunner, tool: &str) -> Result<()> {
    let out = runner.run(&format!("command -v {}", quote(tool))).await?;
    if !out.success() {
        bail!("`{}` not found on PATH", tool);
    }
    Ok(())
}

/// Probe native support by creating and deleting a throwaway interface
pub struct KernelProbe {
    privilege: Privilege,
}

impl KernelProbe {
    pub fn new(privilege: Privilege) -> Self {
        Self { privilege }
    }
}

#[async_trait]
impl InstallStrategy for KernelProbe {
    fn name(&self) -> &str {
        "kernel"
    }

    async fn attempt(&self, runner: &dyn CommandRunner) -> Result<EngineKind> {
        require_tool(runner, "wg").await?;

        let delete = NetCommand::DeleteInterface {
            name: PROBE_INTERFACE.to_string(),
        };
        // Clear a probe left behind by an interrupted run
        runner.run(&self.privilege.wrap_command(&delete)).await?;

        let create = NetCommand::CreateInterface {
            name: PROBE_INTERFACE.to_string(),
        };
        let out = runner.run(&self.privilege.wrap_command(&create)).await?;
        if !out.success() {
            bail!("kernel refused interface: {}", out.stderr.trim());
        }

        let out = runner.run(&self.privilege.wrap_command(&delete)).await?;
        if !out.success() && !delete.is_already_absent(&out.stderr) {
            tracing::warn!("Failed to remove probe interface: {}", out.stderr.trim());
        }

        Ok(EngineKind::Kernel)
    }
}

/// Use a userspace engine binary that is already installed
pub struct ExistingBinary {
    candidates: Vec<String>,
}

impl ExistingBinary {
    /// Check `candidates` (absolute paths) before falling back to `PATH`
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl InstallStrategy for ExistingBinary {
    fn name(&self) -> &str {
        "existing-binary"
    }

    async fn attempt(&self, runner: &dyn CommandRunner) -> Result<EngineKind> {
        require_tool(runner, "wg").await?;

        for candidate in &self.candidates {
            let out = runner.run(&format!("test -x {}", quote(candidate))).await?;
            if out.success() {
                return Ok(EngineKind::Userspace {
                    binary: PathBuf::from(candidate),
                });
            }
        }

        let out = runner
            .run(&format!("command -v {}", USERSPACE_ENGINE))
            .await?;
        if out.success() && !out.text().is_empty() {
            return Ok(EngineKind::Userspace {
                binary: PathBuf::from(out.text()),
            });
        }

        bail!("no {} binary found", USERSPACE_ENGINE)
    }
}

/// Package managers we know how to drive, in detection order
const PACKAGE_MANAGERS: &[(&str, &str)] = &[
    ("apt-get", "DEBIAN_FRONTEND=noninteractive apt-get install -y"),
    ("dnf", "dnf install -y"),
    ("yum", "yum install -y"),
    ("pacman", "pacman -S --noconfirm"),
    ("apk", "apk add"),
    ("zypper", "zypper --non-interactive install"),
];

/// Install the engine through the host's package manager
pub struct PackageManager {
    privilege: Privilege,
    work_dir: String,
}

impl PackageManager {
    pub fn new(privilege: Privilege, work_dir: &str) -> Self {
        Self {
            privilege,
            work_dir: work_dir.to_string(),
        }
    }

    async fn detect(&self, runner: &dyn CommandRunner) -> Result<(&'static str, &'static str)> {
        for (manager, install) in PACKAGE_MANAGERS {
            if runner.run(&format!("command -v {}", manager)).await?.success() {
                return Ok((*manager, *install));
            }
        }
        bail!("no supported package manager detected")
    }
}

#[async_trait]
impl InstallStrategy for PackageManager {
    fn name(&self) -> &str {
        "package-manager"
    }

    async fn attempt(&self, runner: &dyn CommandRunner) -> Result<EngineKind> {
        let (manager, install) = self.detect(runner).await?;
        tracing::info!("Installing wireguard-tools with {}", manager);

        let command = self.privilege.wrap(&format!("{} wireguard-tools", install));
        let out = runner.run(&command).await?;
        if !out.success() {
            bail!("{} failed: {}", manager, out.stderr.trim());
        }

        // Not every distribution packages the userspace engine
        let optional = self.privilege.wrap(&format!("{} {}", install, USERSPACE_ENGINE));
        if let Err(e) = runner.run(&optional).await {
            tracing::debug!("Optional {} install failed: {}", USERSPACE_ENGINE, e);
        }

        if let Ok(kind) = KernelProbe::new(self.privilege).attempt(runner).await {
            return Ok(kind);
        }
        ExistingBinary::new(vec![format!("{}/{}", self.work_dir, USERSPACE_ENGINE)])
            .attempt(runner)
            .await
            .context("packages installed but no usable engine")
    }
}

/// Fetch and compile the userspace engine on the host itself
pub struct SourceBuild {
    privilege: Privilege,
    work_dir: String,
    engine_source: String,
    tools_source: String,
}

impl SourceBuild {
    pub fn new(privilege: Privilege, work_dir: &str) -> Self {
        Self {
            privilege,
            work_dir: work_dir.trim_end_matches('/').to_string(),
            engine_source: DEFAULT_ENGINE_SOURCE.to_string(),
            tools_source: DEFAULT_TOOLS_SOURCE.to_string(),
        }
    }

    /// Override the upstream repositories
    pub fn with_sources(mut self, engine: impl Into<String>, tools: impl Into<String>) -> Self {
        self.engine_source = engine.into();
        self.tools_source = tools.into();
        self
    }
}

#[async_trait]
impl InstallStrategy for SourceBuild {
    fn name(&self) -> &str {
        "source-build"
    }

    async fn attempt(&self, runner: &dyn CommandRunner) -> Result<EngineKind> {
        for tool in ["git", "make", "go"] {
            require_tool(runner, tool).await?;
        }

        if require_tool(runner, "wg").await.is_err() {
            let src = format!("{}/wireguard-tools-src", self.work_dir);
            let build = format!(
                "rm -rf {src} && git clone --depth 1 {url} {src} && make -C {src}/src",
                src = quote(&src),
                url = quote(&self.tools_source),
            );
            runner
                .check(&build)
                .await
                .context("building wireguard-tools")?;
            runner
                .check(&self.privilege.wrap(&format!("make -C {}/src install", quote(&src))))
                .await
                .context("installing wireguard-tools")?;
        }

        let src = format!("{}/wireguard-go-src", self.work_dir);
        let binary = format!("{}/{}", self.work_dir, USERSPACE_ENGINE);
        let build = format!(
            "rm -rf {src} && git clone --depth 1 {url} {src} && make -C {src} && cp {src}/{name} {bin} && chmod 755 {bin}",
            src = quote(&src),
            url = quote(&self.engine_source),
            name = USERSPACE_ENGINE,
            bin = quote(&binary),
        );
        runner.check(&build).await.context("building engine")?;

        Ok(EngineKind::Userspace {
            binary: PathBuf::from(binary),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, RecordingRunner};

    struct Fails(&'static str);

    #[async_trait]
    impl InstallStrategy for Fails {
        fn name(&self) -> &str {
            self.0
        }
        async fn attempt(&self, _runner: &dyn CommandRunner) -> Result<EngineKind> {
            bail!("nope")
        }
    }

    struct Succeeds;

    #[async_trait]
    impl InstallStrategy for Succeeds {
        fn name(&self) -> &str {
            "ok"
        }
        async fn attempt(&self, _runner: &dyn CommandRunner) -> Result<EngineKind> {
            Ok(EngineKind::Kernel)
        }
    }

    #[tokio::test]
    async fn test_chain_short_circuits() {
        let runner = RecordingRunner::new();
        let strategies: Vec<Box<dyn InstallStrategy>> =
            vec![Box::new(Fails("a")), Box::new(Succeeds), Box::new(Fails("never"))];
        let kind = resolve_engine(&runner, &strategies).await.unwrap();
        assert_eq!(kind, EngineKind::Kernel);
    }

    #[tokio::test]
    async fn test_chain_exhaustion_reports_every_attempt() {
        let runner = RecordingRunner::new();
        let strategies: Vec<Box<dyn InstallStrategy>> =
            vec![Box::new(Fails("a")), Box::new(Fails("b"))];
        let attempts = resolve_engine(&runner, &strategies).await.unwrap_err();
        assert_eq!(attempts, vec!["a: nope".to_string(), "b: nope".to_string()]);
    }

    #[tokio::test]
    async fn test_kernel_probe_creates_and_deletes() {
        let runner = RecordingRunner::new();
        let kind = KernelProbe::new(Privilege::Sudo)
            .attempt(&runner)
            .await
            .unwrap();
        assert_eq!(kind, EngineKind::Kernel);
        assert_eq!(
            runner.count_matching("sudo -n ip link add dev bwprobe0 type wireguard"),
            1
        );
        assert_eq!(runner.count_matching("sudo -n ip link del dev bwprobe0"), 2);
    }

    #[tokio::test]
    async fn test_kernel_probe_fails_without_module() {
        let runner = RecordingRunner::new();
        runner.respond(
            "type wireguard",
            CommandOutput::failed(2, "Error: Unknown device type."),
        );
        let err = KernelProbe::new(Privilege::Root)
            .attempt(&runner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown device type"));
    }

    #[tokio::test]
    async fn test_existing_binary_prefers_candidates() {
        let runner = RecordingRunner::new();
        let kind = ExistingBinary::new(vec!["/opt/burrow/wireguard-go".to_string()])
            .attempt(&runner)
            .await
            .unwrap();
        assert_eq!(
            kind,
            EngineKind::Userspace {
                binary: PathBuf::from("/opt/burrow/wireguard-go")
            }
        );
    }

    #[tokio::test]
    async fn test_existing_binary_falls_back_to_path() {
        let runner = RecordingRunner::new();
        runner.respond("test -x", CommandOutput::failed(1, ""));
        runner.respond(
            "command -v wireguard-go",
            CommandOutput::ok("/usr/local/bin/wireguard-go\n"),
        );
        let kind = ExistingBinary::new(vec!["/missing".to_string()])
            .attempt(&runner)
            .await
            .unwrap();
        assert_eq!(
            kind,
            EngineKind::Userspace {
                binary: PathBuf::from("/usr/local/bin/wireguard-go")
            }
        );
    }

    #[tokio::test]
    async fn test_package_manager_picks_first_available() {
        let runner = RecordingRunner::new();
        runner.respond("command -v apt-get", CommandOutput::failed(1, ""));
        // dnf is detected; everything else succeeds by default
        let kind = PackageManager::new(Privilege::Sudo, "/tmp/w")
            .attempt(&runner)
            .await
            .unwrap();
        assert_eq!(kind, EngineKind::Kernel);
        assert_eq!(runner.count_matching("sudo -n dnf install -y wireguard-tools"), 1);
        assert_eq!(runner.count_matching("apt-get install"), 0);
    }

    #[tokio::test]
    async fn test_package_manager_none_detected() {
        let runner = RecordingRunner::new();
        runner.respond("command -v", CommandOutput::failed(1, ""));
        let err = PackageManager::new(Privilege::Root, "/tmp/w")
            .attempt(&runner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no supported package manager"));
    }

    #[tokio::test]
    async fn test_source_build_requires_toolchain() {
        let runner = RecordingRunner::new();
        runner.respond("command -v go", CommandOutput::failed(1, ""));
        let err = SourceBuild::new(Privilege::Root, "/tmp/w")
            .attempt(&runner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("`go` not found"));
    }

    #[tokio::test]
    async fn test_source_build_installs_into_work_dir() {
        let runner = RecordingRunner::new();
        let kind = SourceBuild::new(Privilege::Root, "/tmp/w/")
            .attempt(&runner)
            .await
            .unwrap();
        assert_eq!(
            kind,
            EngineKind::Userspace {
                binary: PathBuf::from("/tmp/w/wireguard-go")
            }
        );
        assert_eq!(runner.count_matching("git clone --depth 1"), 1);
    }

    #[tokio::test]
    async fn test_default_chain_order() {
        let chain = default_chain(Privilege::Root, "/tmp/w");
        let names: Vec<&str> = chain.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["kernel", "existing-binary", "package-manager", "source-build"]
        );
    }
}
