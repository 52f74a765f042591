//! Worker launch and termination via start-stop-daemon

use std::path::Path;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::{CommandOutput, DaemonLauncher, LaunchRequest, run_captured};
use crate::error::ToolError;

pub struct StartStopDaemon {
    program: String,
    kill_grace: Duration,
}

impl StartStopDaemon {
    pub fn new(program: impl Into<String>, kill_grace: Duration) -> Self {
        Self {
            program: program.into(),
            kill_grace,
        }
    }
}

/// Arguments for `--start`: detach, switch credentials, write the pid file, exec.
pub fn start_args(request: &LaunchRequest) -> Vec<String> {
    let mut args = vec!["--start".to_string()];

    match (request.user.as_deref(), request.group.as_deref()) {
        (Some(user), Some(group)) if !user.is_empty() && !group.is_empty() => {
            args.extend(["--chuid".to_string(), format!("{user}:{group}")]);
        }
        (Some(user), _) if !user.is_empty() => {
            args.extend(["--chuid".to_string(), user.to_string()]);
        }
        _ => {}
    }

    args.extend([
        "--background".to_string(),
        "--pidfile".to_string(),
        request.pid_file.display().to_string(),
        "--make-pidfile".to_string(),
        "--verbose".to_string(),
        "--exec".to_string(),
        request.exec.clone(),
    ]);

    let extra = split_arguments(&request.arguments);
    if !extra.is_empty() {
        args.push("--".to_string());
        args.extend(extra);
    }
    args
}

/// Arguments for `--stop`: TERM, wait `timeout`, then KILL and wait `kill_grace`.
pub fn stop_args(pid_file: &Path, timeout: Duration, kill_grace: Duration) -> Vec<String> {
    vec![
        "--stop".to_string(),
        "--verbose".to_string(),
        "--pidfile".to_string(),
        pid_file.display().to_string(),
        format!(
            "--retry=TERM/{}/KILL/{}",
            timeout.as_secs(),
            kill_grace.as_secs()
        ),
    ]
}

fn split_arguments(arguments: &str) -> Vec<String> {
    match shell_words::split(arguments) {
        Ok(words) => words,
        Err(e) => {
            log::warn!("Cannot split arguments {arguments:?} ({e}), splitting on whitespace");
            arguments.split_whitespace().map(str::to_string).collect()
        }
    }
}

impl DaemonLauncher for StartStopDaemon {
    fn start<'a>(
        &'a self,
        request: &'a LaunchRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>> {
        async move {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled(self.program.clone()));
            }
            // Once spawned the launch is allowed to finish so no half-started
            // daemon is left behind without a pid file.
            run_captured(&self.program, &start_args(request), &CancellationToken::new()).await
        }
        .boxed()
    }

    fn stop<'a>(
        &'a self,
        pid_file: &'a Path,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>> {
        async move {
            run_captured(
                &self.program,
                &stop_args(pid_file, timeout, self.kill_grace),
                &CancellationToken::new(),
            )
            .await
        }
        .boxed()
    }
}
