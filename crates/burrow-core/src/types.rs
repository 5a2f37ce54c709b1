//! Core domain types

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Operating system and CPU architecture of a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Lowercased `uname -s`, e.g. `linux`
    pub os: String,
    /// Normalised `uname -m`, e.g. `x86_64` or `aarch64`
    pub arch: String,
}

impl Platform {
    /// Build from raw `uname -s` / `uname -m` output
    pub fn from_uname(os: &str, arch: &str) -> Self {
        let arch = match arch.trim() {
            "amd64" => "x86_64",
            "arm64" => "aarch64",
            "armv7l" | "armv7" => "armv7",
            other => other,
        };
        Self {
            os: os.trim().to_lowercase(),
            arch: arch.to_string(),
        }
    }

    /// The platform this binary was built for
    pub fn local() -> Self {
        Self::from_uname(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Rust target triple for a statically linked endpoint build
    ///
    /// `None` when no endpoint build exists for this platform.
    pub fn target_triple(&self) -> Option<&'static str> {
        match (self.os.as_str(), self.arch.as_str()) {
            ("linux", "x86_64") => Some("x86_64-unknown-linux-musl"),
            ("linux", "aarch64") => Some("aarch64-unknown-linux-musl"),
            ("linux", "armv7") => Some("armv7-unknown-linux-musleabihf"),
            _ => None,
        }
    }

    /// `GOARCH` value for building the userspace engine
    pub fn go_arch(&self) -> Option<&'static str> {
        match self.arch.as_str() {
            "x86_64" => Some("amd64"),
            "aarch64" => Some("arm64"),
            "armv7" => Some("arm"),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// How the tunnel interface is provided on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineKind {
    /// The kernel provides the interface natively
    Kernel,
    /// A userspace engine binary provides the interface as a subprocess
    Userspace { binary: PathBuf },
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Kernel => write!(f, "kernel"),
            EngineKind::Userspace { binary } => write!(f, "userspace ({})", binary.display()),
        }
    }
}

/// Lifecycle state of a tunnel endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointState::Stopped => write!(f, "stopped"),
            EndpointState::Starting => write!(f, "starting"),
            EndpointState::Running => write!(f, "running"),
            EndpointState::Stopping => write!(f, "stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_uname_normalises() {
        let p = Platform::from_uname("Linux\n", "amd64");
        assert_eq!(p.os, "linux");
        assert_eq!(p.arch, "x86_64");
        assert_eq!(p.target_triple(), Some("x86_64-unknown-linux-musl"));
        assert_eq!(p.go_arch(), Some("amd64"));
    }

    #[test]
    fn test_platform_unsupported() {
        let p = Platform::from_uname("Darwin", "arm64");
        assert_eq!(p.arch, "aarch64");
        assert_eq!(p.target_triple(), None);
    }

    #[test]
    fn test_engine_kind_serde() {
        let kind = EngineKind::Userspace {
            binary: PathBuf::from("/usr/bin/wireguard-go"),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"kind":"userspace","binary":"/usr/bin/wireguard-go"}"#);
        let kernel: EngineKind = serde_json::from_str(r#"{"kind":"kernel"}"#).unwrap();
        assert_eq!(kernel, EngineKind::Kernel);
    }

    #[test]
    fn test_endpoint_state_display() {
        assert_eq!(EndpointState::Running.to_string(), "running");
    }
}
