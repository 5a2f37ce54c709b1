//! Command execution seam
//!
//! Everything that touches interfaces, firewall rules or packages goes
//! through [`CommandRunner`]. The endpoint and connector use [`LocalRunner`];
//! the deployer implements the trait over its SSH session. [`RecordingRunner`]
//! answers from a script instead of executing anything, which backs both
//! dry runs and tests.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: u32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// Convert a non-zero exit into [`ExecError::Failed`]
    pub fn into_result(self, command: &str) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::Failed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum ExecError {
    /// The command could not be started at all
    #[error("Failed to run `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// The command ran and exited non-zero
    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: u32,
        stderr: String,
    },

    /// The command did not finish in time
    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// The transport carrying the command failed
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Runs shell command lines and captures their output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command line, returning its output whatever the exit status
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Run a command line with `input` written to its stdin
    ///
    /// Used for secrets (sudo passwords, private keys) so they never appear
    /// in a process listing.
    async fn run_with_input(&self, command: &str, input: &[u8])
        -> Result<CommandOutput, ExecError>;

    /// Run a command line and require a zero exit status
    async fn check(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.run(command).await?.into_result(command)
    }
}

/// Quote a single shell word
pub fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=,@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Join words into a quoted command line
pub fn join_words<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs commands on this machine through `sh -c`
#[derive(Debug, Clone)]
pub struct LocalRunner {
    timeout: Option<Duration>,
}

impl LocalRunner {
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Kill commands that run longer than `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    async fn execute(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput, ExecError> {
        tracing::debug!("Running: {}", command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            // A command that exits without reading stdin is not an error
            if let Err(e) = stdin.write_all(input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(ExecError::Spawn {
                        command: command.to_string(),
                        reason: format!("failed to write stdin: {}", e),
                    });
                }
            }
        }

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(after) => tokio::time::timeout(after, wait)
                .await
                .map_err(|_| ExecError::Timeout {
                    command: command.to_string(),
                    after,
                })?,
            None => wait.await,
        }
        .map_err(|e| ExecError::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal: report like a shell would
            exit_code: output.status.code().map(|c| c as u32).unwrap_or(128),
        })
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.execute(command, None).await
    }

    async fn run_with_input(
        &self,
        command: &str,
        input: &[u8],
    ) -> Result<CommandOutput, ExecError> {
        self.execute(command, Some(input)).await
    }
}

struct Rule {
    pattern: String,
    output: CommandOutput,
    remaining: Option<usize>,
}

/// Records commands and answers them from a script
///
/// Rules match when their pattern is a substring of the command. Later rules
/// take precedence, and a rule registered with [`respond_times`] stops
/// matching once used up. Unmatched commands succeed with empty output.
///
/// [`respond_times`]: RecordingRunner::respond_times
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    inputs: Mutex<Vec<Vec<u8>>>,
    rules: Mutex<Vec<Rule>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command containing `pattern` with `output`
    pub fn respond(&self, pattern: impl Into<String>, output: CommandOutput) -> &Self {
        self.push_rule(pattern.into(), output, None);
        self
    }

    /// Answer the next `times` commands containing `pattern` with `output`
    pub fn respond_times(
        &self,
        pattern: impl Into<String>,
        output: CommandOutput,
        times: usize,
    ) -> &Self {
        self.push_rule(pattern.into(), output, Some(times));
        self
    }

    fn push_rule(&self, pattern: String, output: CommandOutput, remaining: Option<usize>) {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                pattern,
                output,
                remaining,
            });
    }

    /// Every command seen so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of recorded commands containing `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Every stdin payload seen so far
    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn answer(&self, command: &str) -> CommandOutput {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.to_string());

        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        for rule in rules.iter_mut().rev() {
            if !command.contains(&rule.pattern) {
                continue;
            }
            match rule.remaining {
                Some(0) => continue,
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            return rule.output.clone();
        }
        CommandOutput::ok("")
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        tracing::debug!("[recorded] {}", command);
        Ok(self.answer(command))
    }

    async fn run_with_input(
        &self,
        command: &str,
        input: &[u8],
    ) -> Result<CommandOutput, ExecError> {
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(input.to_vec());
        self.run(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_words() {
        assert_eq!(quote("wg"), "wg");
        assert_eq!(quote("10.99.1.0/24"), "10.99.1.0/24");
    }

    #[test]
    fn test_quote_special_chars() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_join_words() {
        assert_eq!(join_words(["ip", "link", "del", "dev x"]), "ip link del 'dev x'");
    }

    #[test]
    fn test_into_result() {
        assert!(CommandOutput::ok("x").into_result("true").is_ok());
        let err = CommandOutput::failed(2, "boom\n").into_result("false").unwrap_err();
        assert!(err.to_string().contains("status 2: boom"));
    }

    #[tokio::test]
    async fn test_recording_runner_defaults_to_success() {
        let runner = RecordingRunner::new();
        let out = runner.run("anything").await.unwrap();
        assert!(out.success());
        assert_eq!(runner.commands(), vec!["anything".to_string()]);
    }

    #[tokio::test]
    async fn test_recording_runner_later_rules_win() {
        let runner = RecordingRunner::new();
        runner.respond("wg", CommandOutput::failed(1, "old"));
        runner.respond("wg show", CommandOutput::ok("new"));

        assert_eq!(runner.run("wg show x").await.unwrap().stdout, "new");
        assert_eq!(runner.run("wg set x").await.unwrap().exit_code, 1);
    }

    #[tokio::test]
    async fn test_recording_runner_limited_rule() {
        let runner = RecordingRunner::new();
        runner.respond("iptables -D", CommandOutput::failed(1, "absent"));
        runner.respond_times("iptables -D", CommandOutput::ok(""), 2);

        assert!(runner.run("iptables -D FORWARD").await.unwrap().success());
        assert!(runner.run("iptables -D FORWARD").await.unwrap().success());
        assert!(!runner.run("iptables -D FORWARD").await.unwrap().success());
    }

    #[tokio::test]
    async fn test_recording_runner_captures_input() {
        let runner = RecordingRunner::new();
        runner.run_with_input("sudo -S true", b"secret\n").await.unwrap();
        assert_eq!(runner.inputs(), vec![b"secret\n".to_vec()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_runner_captures_output() {
        let runner = LocalRunner::new();
        let out = runner.run("echo hello; echo oops >&2; exit 3").await.unwrap();
        assert_eq!(out.text(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_runner_stdin() {
        let runner = LocalRunner::new();
        let out = runner.run_with_input("cat", b"piped").await.unwrap();
        assert_eq!(out.stdout, "piped");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_runner_timeout() {
        let runner = LocalRunner::with_timeout(Duration::from_millis(100));
        let err = runner.run("sleep 5").await.unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }
}
