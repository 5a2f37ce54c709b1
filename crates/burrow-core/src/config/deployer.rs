//! Deployer configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::command::Privilege;
use crate::install::DEFAULT_ENGINE_SOURCE;
use crate::liveness::DEFAULT_HEARTBEAT_INTERVAL;

/// How the deployer authenticates its SSH session
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SshAuth {
    Password {
        password: String,
    },
    KeyFile {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl Default for SshAuth {
    fn default() -> Self {
        SshAuth::KeyFile {
            path: dirs::home_dir()
                .unwrap_or_default()
                .join(".ssh")
                .join("id_ed25519"),
            passphrase: None,
        }
    }
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::Password { .. } => f.write_str("Password([REDACTED])"),
            SshAuth::KeyFile { path, .. } => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// Configuration for driving one remote host
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Remote host name or address
    pub host: String,

    /// SSH port
    pub port: u16,

    /// Remote user
    pub username: String,

    /// SSH credentials
    pub auth: SshAuth,

    /// Expected host key fingerprint (SHA-256, as printed by ssh-keygen);
    /// any key is accepted with a warning when unset
    pub host_key_fingerprint: Option<String>,

    /// Password fed to `sudo -S` when the user lacks passwordless sudo
    #[serde(skip_serializing)]
    pub sudo_password: Option<String>,

    /// Base remote work directory; each tunnel gets `<work_dir>/<port>`
    pub work_dir: String,

    /// Heartbeat write interval
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// SSH connect timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for individual remote commands
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// Directory of prebuilt `burrow-server-<target>` binaries
    pub artifacts_dir: PathBuf,

    /// Local checkout of the userspace engine, built and uploaded when the
    /// remote host cannot build it itself
    pub engine_source_dir: Option<PathBuf>,

    /// Upstream source fetched by remote source builds
    pub engine_source_url: String,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            username: whoami::username(),
            auth: SshAuth::default(),
            host_key_fingerprint: None,
            sudo_password: None,
            work_dir: "/tmp/burrow".to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
            artifacts_dir: super::default_config_dir().join("artifacts"),
            engine_source_dir: None,
            engine_source_url: DEFAULT_ENGINE_SOURCE.to_string(),
        }
    }
}

impl std::fmt::Debug for DeployerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth", &self.auth)
            .field("sudo_password", &self.sudo_password.as_ref().map(|_| "[REDACTED]"))
            .field("work_dir", &self.work_dir)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("artifacts_dir", &self.artifacts_dir)
            .finish_non_exhaustive()
    }
}

impl DeployerConfig {
    /// `host:port` for the SSH connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// How privileged remote commands are escalated
    pub fn privilege(&self) -> Privilege {
        if self.username == "root" {
            Privilege::Root
        } else if self.sudo_password.is_some() {
            Privilege::SudoWithPassword
        } else {
            Privilege::Sudo
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeployerConfig::default();
        assert_eq!(config.port, 22);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.work_dir, "/tmp/burrow");
    }

    #[test]
    fn test_privilege_selection() {
        let mut config = DeployerConfig {
            username: "root".to_string(),
            ..Default::default()
        };
        assert_eq!(config.privilege(), Privilege::Root);

        config.username = "deploy".to_string();
        assert_eq!(config.privilege(), Privilege::Sudo);

        config.sudo_password = Some("hunter2".to_string());
        assert_eq!(config.privilege(), Privilege::SudoWithPassword);
    }

    #[test]
    fn test_auth_from_toml() {
        let config: DeployerConfig = toml::from_str(
            r#"
host = "10.0.0.5"
username = "ops"

[auth]
method = "password"
password = "s3cret"
"#,
        )
        .unwrap();
        assert_eq!(config.address(), "10.0.0.5:22");
        assert!(matches!(config.auth, SshAuth::Password { .. }));
        assert!(!format!("{:?}", config).contains("s3cret"));
    }
}
