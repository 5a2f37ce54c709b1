//! Remote endpoint process control
//!
//! Lookups use exact process-name matching (`pgrep -x`) against a name that
//! embeds the listen port, so unrelated processes and endpoints for other
//! tunnels on the same host are never touched.

use std::time::Duration;

use burrow_core::command::Privilege;
use burrow_core::exec::{quote, CommandRunner, ExecError};

/// Grace period before force-killing a stale endpoint during deploy
pub const STALE_KILL_GRACE: Duration = Duration::from_secs(3);

/// Grace period before force-killing a running endpoint on stop
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// How often the process table is polled while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Endpoint configuration file name inside the work directory
pub const CONFIG_FILE_NAME: &str = "server.toml";

/// Endpoint stdout/stderr log inside the work directory
pub const SERVER_LOG_NAME: &str = "server.log";

/// Remote process (and binary) name of the endpoint for `listen_port`
pub fn process_name(listen_port: u16) -> String {
    format!("burrow-{}", listen_port)
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running
    NotRunning,
    /// The process exited after the graceful signal
    Terminated,
    /// The process had to be force-killed
    Killed,
}

/// PIDs of processes named exactly `name`
pub async fn find_pids(runner: &dyn CommandRunner, name: &str) -> Result<Vec<u32>, ExecError> {
    let command = format!("pgrep -x {}", quote(name));
    let out = runner.run(&command).await?;
    match out.exit_code {
        0 => Ok(out
            .stdout
            .lines()
            .filter_map(|l| l.trim().parse().ok())
            .collect()),
        // pgrep: no process matched
        1 => Ok(Vec::new()),
        _ => Err(ExecError::Failed {
            command,
            exit_code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        }),
    }
}

/// Signal every process named `name`, ignoring "no process matched"
async fn signal(
    runner: &dyn CommandRunner,
    privilege: Privilege,
    signal: &str,
    name: &str,
) -> Result<(), ExecError> {
    let command = privilege.wrap(&format!("pkill -{} -x {}", signal, quote(name)));
    let out = runner.run(&command).await?;
    if out.success() || out.exit_code == 1 {
        return Ok(());
    }
    Err(ExecError::Failed {
        command,
        exit_code: out.exit_code,
        stderr: out.stderr.trim().to_string(),
    })
}

/// Wait up to `within` for every process named `name` to exit
async fn wait_gone(
    runner: &dyn CommandRunner,
    name: &str,
    within: Duration,
) -> Result<bool, ExecError> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        if find_pids(runner, name).await?.is_empty() {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
    }
}

/// Gracefully terminate `name`, force-killing it after `grace`
pub async fn stop_process(
    runner: &dyn CommandRunner,
    privilege: Privilege,
    name: &str,
    grace: Duration,
) -> Result<StopOutcome, ExecError> {
    let pids = find_pids(runner, name).await?;
    if pids.is_empty() {
        tracing::debug!("No {} process running", name);
        return Ok(StopOutcome::NotRunning);
    }

    tracing::info!("Terminating {} (pids {:?})", name, pids);
    signal(runner, privilege, "TERM", name).await?;
    if wait_gone(runner, name, grace).await? {
        return Ok(StopOutcome::Terminated);
    }

    tracing::warn!("{} still running after {:?}; force-killing", name, grace);
    signal(runner, privilege, "KILL", name).await?;
    if !wait_gone(runner, name, POLL_INTERVAL * 4).await? {
        tracing::warn!("{} survived SIGKILL", name);
    }
    Ok(StopOutcome::Killed)
}

/// Shell line that starts the endpoint detached from the SSH session
///
/// Output goes to [`SERVER_LOG_NAME`], which is truncated on each launch.
pub fn launch_command(privilege: Privilege, work_dir: &str, name: &str) -> String {
    let program = format!("./{}", quote(name));
    let detached = |program: &str| {
        format!(
            "cd {} && nohup setsid {} --config {} > {} 2>&1 < /dev/null &",
            quote(work_dir),
            program,
            CONFIG_FILE_NAME,
            SERVER_LOG_NAME
        )
    };

    match privilege {
        Privilege::Root => detached(&program),
        Privilege::Sudo => detached(&format!("sudo -n {}", program)),
        // sudo reads the password from this command's stdin, so the
        // redirections must apply inside the elevated shell
        Privilege::SudoWithPassword => {
            privilege.wrap(&format!("sh -c {}", quote(&detached(&program))))
        }
    }
}
