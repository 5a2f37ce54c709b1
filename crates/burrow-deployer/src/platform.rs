//! Remote platform detection and endpoint binary selection

use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_core::error::DeployError;
use burrow_core::exec::{quote, CommandRunner, ExecError, LocalRunner};
use burrow_core::types::Platform;

/// Name of the endpoint binary produced by the workspace
pub const ENDPOINT_BINARY: &str = "burrow-server";

/// Upper bound on a local cross-build of the endpoint
const BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Ask the remote host for its OS and architecture
pub async fn detect_platform(runner: &dyn CommandRunner) -> Result<Platform, ExecError> {
    let out = runner.check("uname -s && uname -m").await?;
    let mut lines = out.stdout.lines();
    let os = lines.next().unwrap_or_default();
    let arch = lines.next().unwrap_or_default();
    Ok(Platform::from_uname(os, arch))
}

/// File name of a prebuilt endpoint for `triple`
pub fn artifact_name(triple: &str) -> String {
    format!("{}-{}", ENDPOINT_BINARY, triple)
}

/// Locate an endpoint binary for `platform` without building one
///
/// Looks in `artifacts_dir` first, then next to the running executable when
/// the local platform matches.
pub fn find_binary(artifacts_dir: &Path, platform: &Platform) -> Result<Option<PathBuf>, DeployError> {
    let triple = triple_for(platform)?;

    let prebuilt = artifacts_dir.join(artifact_name(triple));
    if prebuilt.is_file() {
        tracing::debug!("Using prebuilt endpoint {:?}", prebuilt);
        return Ok(Some(prebuilt));
    }

    if *platform == Platform::local() {
        if let Some(sibling) = sibling_binary() {
            tracing::debug!("Using local endpoint build {:?}", sibling);
            return Ok(Some(sibling));
        }
    }
    Ok(None)
}

/// Locate an endpoint binary for `platform`, cross-building with cargo when
/// none exists
pub async fn select_binary(
    host: &str,
    artifacts_dir: &Path,
    platform: &Platform,
) -> Result<PathBuf, DeployError> {
    match find_binary(artifacts_dir, platform)? {
        Some(binary) => Ok(binary),
        None => build_endpoint(host, triple_for(platform)?).await,
    }
}

fn triple_for(platform: &Platform) -> Result<&'static str, DeployError> {
    platform
        .target_triple()
        .ok_or_else(|| DeployError::UnsupportedPlatform {
            os: platform.os.clone(),
            arch: platform.arch.clone(),
        })
}

fn sibling_binary() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let sibling = exe.parent()?.join(ENDPOINT_BINARY);
    sibling.is_file().then_some(sibling)
}

async fn build_endpoint(host: &str, triple: &str) -> Result<PathBuf, DeployError> {
    tracing::info!("Building {} for {}", ENDPOINT_BINARY, triple);
    let command = format!(
        "cargo build --release --target {} -p {}",
        quote(triple),
        ENDPOINT_BINARY
    );
    LocalRunner::with_timeout(BUILD_TIMEOUT)
        .check(&command)
        .await
        .map_err(|e| DeployError::Deployment {
            host: host.to_string(),
            step: "build endpoint".to_string(),
            detail: format!(
                "{}\nPlace a prebuilt binary named {} in the artifacts directory to skip the build.",
                e,
                artifact_name(triple)
            ),
        })?;

    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("target"));
    let built = target_dir.join(triple).join("release").join(ENDPOINT_BINARY);
    if !built.is_file() {
        return Err(DeployError::Deployment {
            host: host.to_string(),
            step: "build endpoint".to_string(),
            detail: format!("build succeeded but {:?} is missing", built),
        });
    }
    Ok(built)
}
