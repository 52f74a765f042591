//! External tool plumbing.
//!
//! The supervisor never forks or switches users itself. It drives two external
//! programs instead:
//! - a daemonization tool (start-stop-daemon) that detaches a worker, runs it
//!   under the requested credentials and writes its pid file
//! - a privilege-switching tool (su) that runs hooks as a given user
//!
//! Both sit behind traits so the worker lifecycle can be exercised without them.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::ToolError;
use crate::template::ResolvedCommand;

mod daemon_tool;
mod privileged;

pub use daemon_tool::{StartStopDaemon, start_args, stop_args};
pub use privileged::{SuRunner, su_args};

const TRIM_CHARS: &[char] = &['\r', '\n', '\t', ' '];

/// Exit code and captured streams of a finished tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Standard output when there is any, standard error otherwise.
    pub fn text(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

/// What the daemonization tool needs to launch one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub user: Option<String>,
    pub group: Option<String>,
    pub pid_file: PathBuf,
    pub exec: String,
    pub arguments: String,
}

impl LaunchRequest {
    pub fn new(command: &ResolvedCommand, pid_file: &Path) -> Self {
        Self {
            user: command.user.clone(),
            group: command.group.clone(),
            pid_file: pid_file.to_path_buf(),
            exec: command.exec.clone(),
            arguments: command.arguments.clone(),
        }
    }
}

/// Starts detached workers and stops them through their pid file.
pub trait DaemonLauncher: Send + Sync {
    /// Launch in the background. Returns once the tool itself has exited.
    fn start<'a>(
        &'a self,
        request: &'a LaunchRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>>;

    /// TERM, wait up to `timeout`, then KILL. Must tolerate an already dead process.
    fn stop<'a>(
        &'a self,
        pid_file: &'a Path,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>>;
}

/// Runs hook commands, optionally as another user.
pub trait HookRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        command: &'a ResolvedCommand,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>>;
}

/// The pair of tools every worker uses.
#[derive(Clone)]
pub struct Toolbox {
    pub launcher: Arc<dyn DaemonLauncher>,
    pub runner: Arc<dyn HookRunner>,
}

impl Toolbox {
    /// start-stop-daemon and su as configured in `cfg.tools`.
    pub fn system(cfg: &SupervisorConfig) -> Self {
        Self {
            launcher: Arc::new(StartStopDaemon::new(
                cfg.tools.daemon.clone(),
                cfg.kill_grace(),
            )),
            runner: Arc::new(SuRunner::new(cfg.tools.privileged.clone())),
        }
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox").finish_non_exhaustive()
    }
}

/// Run `program args`, capture both streams and wait for it to exit.
///
/// Cancelling the token kills the child (it is reaped in the background) and
/// yields [`ToolError::Cancelled`].
pub async fn run_captured(
    program: &str,
    args: &[String],
    cancel: &CancellationToken,
) -> Result<CommandOutput, ToolError> {
    log::info!("CMD ( {} )", render(program, args));

    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled(program.to_string()));
    }

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;
    let pid = child.id().unwrap_or_default();

    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(|source| ToolError::Wait {
            program: program.to_string(),
            source,
        })?,
        _ = cancel.cancelled() => {
            log::warn!("PID#{pid} ({program}) cancelled, killing it");
            return Err(ToolError::Cancelled(program.to_string()));
        }
    };

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout)
            .trim_matches(TRIM_CHARS)
            .to_string(),
        stderr: String::from_utf8_lossy(&output.stderr)
            .trim_matches(TRIM_CHARS)
            .to_string(),
    };

    let code = result
        .code
        .map_or_else(|| "none".to_string(), |c| c.to_string());
    if !result.stdout.is_empty() {
        log::info!("PID#{pid} code {code}, StandardOutput: {}", result.stdout);
    }
    if !result.stderr.is_empty() {
        log::info!("PID#{pid} code {code}, StandardError: {}", result.stderr);
    }

    Ok(result)
}

fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", shell_words::join(args))
    }
}

/// Whether a process with this pid is in the process table.
pub fn process_exists(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists, but belongs to someone we may not signal.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_code_and_both_streams_separately() {
        let cancel = CancellationToken::new();
        let out = run_captured(
            "sh",
            &["-c".into(), "echo ' out '; echo err >&2; exit 3".into()],
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "out");
        assert_eq!(out.stderr, "err");
        assert!(!out.success());
        assert_eq!(out.text(), "out");
    }

    #[tokio::test]
    async fn text_falls_back_to_stderr() {
        let cancel = CancellationToken::new();
        let out = run_captured("sh", &["-c".into(), "echo oops >&2".into()], &cancel)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.text(), "oops");
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_command() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = run_captured("sleep", &["30".into()], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let cancel = CancellationToken::new();
        let err = run_captured("/nonexistent/workervisor-tool", &[], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn own_process_exists_and_bogus_pids_do_not() {
        assert!(process_exists(std::process::id() as i32));
        assert!(!process_exists(0));
        assert!(!process_exists(-1));
        assert!(!process_exists(i32::MAX - 1));
    }
}
