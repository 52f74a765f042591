//! Stand-ins for start-stop-daemon and su.
#![allow(dead_code)]

use std::path::Path;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use workervisor::config::SupervisorConfig;
use workervisor::control::{CommandOutput, DaemonLauncher, HookRunner, LaunchRequest, Toolbox};
use workervisor::error::ToolError;
use workervisor::ipc::WorkerStatus;
use workervisor::manager::Supervisor;
use workervisor::state_machine::State;
use workervisor::template::ResolvedCommand;

const OK: CommandOutput = CommandOutput {
    code: Some(0),
    stdout: String::new(),
    stderr: String::new(),
};

#[derive(Default)]
pub struct FakeLauncher {
    children: Mutex<Vec<Child>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    launched: Mutex<Vec<i32>>,
    /// Never spawns anything nor writes the pid file.
    silent: bool,
    failing_stop: bool,
    /// Write the pid file this long after returning, like a detached child would.
    pid_delay: Option<Duration>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn silent() -> Arc<Self> {
        let mut launcher = Self::default();
        launcher.silent = true;
        Arc::new(launcher)
    }

    pub fn failing_stop() -> Arc<Self> {
        let mut launcher = Self::default();
        launcher.failing_stop = true;
        Arc::new(launcher)
    }

    pub fn late_pid_file(delay: Duration) -> Arc<Self> {
        let mut launcher = Self::default();
        launcher.pid_delay = Some(delay);
        Arc::new(launcher)
    }

    /// Pids of every process started so far, in launch order.
    pub fn launched(&self) -> Vec<i32> {
        self.launched.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Kill and reap the worker with this pid, as if it had crashed.
    pub fn kill(&self, pid: i32) {
        let mut children = self.children.lock().unwrap();
        if let Some(pos) = children.iter().position(|c| c.id() as i32 == pid) {
            let mut child = children.remove(pos);
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn kill_all(&self) {
        for mut child in self.children.lock().unwrap().drain(..) {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FakeLauncher {
    fn drop(&mut self) {
        self.kill_all();
    }
}

impl DaemonLauncher for FakeLauncher {
    fn start<'a>(
        &'a self,
        request: &'a LaunchRequest,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.silent {
                return Ok(OK);
            }
            let child = Command::new("sleep")
                .arg("60")
                .spawn()
                .map_err(|source| ToolError::Spawn {
                    program: "sleep".into(),
                    source,
                })?;
            let pid = child.id() as i32;
            self.launched.lock().unwrap().push(pid);
            self.children.lock().unwrap().push(child);
            match self.pid_delay {
                Some(delay) => {
                    let pid_file = request.pid_file.clone();
                    std::thread::spawn(move || {
                        std::thread::sleep(delay);
                        std::fs::write(pid_file, format!("{pid}\n")).unwrap();
                    });
                }
                None => std::fs::write(&request.pid_file, format!("{pid}\n")).unwrap(),
            }
            Ok(OK)
        })
    }

    fn stop<'a>(
        &'a self,
        pid_file: &'a Path,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.failing_stop {
                return Err(ToolError::Spawn {
                    program: "start-stop-daemon".into(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
                });
            }
            if let Some(pid) = std::fs::read_to_string(pid_file)
                .ok()
                .and_then(|text| text.trim().parse::<i32>().ok())
            {
                self.kill(pid);
            }
            Ok(OK)
        })
    }
}

/// Records every hook instead of running it.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<ResolvedCommand>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ResolvedCommand> {
        self.calls.lock().unwrap().clone()
    }
}

impl HookRunner for RecordingRunner {
    fn run<'a>(
        &'a self,
        command: &'a ResolvedCommand,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(command.clone());
            Ok(OK)
        })
    }
}

pub fn toolbox(launcher: &Arc<FakeLauncher>, runner: &Arc<RecordingRunner>) -> Toolbox {
    Toolbox {
        launcher: launcher.clone(),
        runner: runner.clone(),
    }
}

/// Fast timings and every directory under `root`.
pub fn test_config(root: &Path) -> SupervisorConfig {
    let cfg = SupervisorConfig {
        apps_available_dir: root.join("apps-available"),
        apps_enabled_dir: root.join("apps-enabled"),
        log_file: root.join("workervisor.log"),
        pid_dir: root.join("run"),
        health_interval_secs: 3600,
        pid_poll_interval_ms: 20,
        pid_wait_timeout_secs: 5,
        task_join_grace_ms: 500,
        ..SupervisorConfig::default()
    };
    for dir in [&cfg.apps_available_dir, &cfg.apps_enabled_dir, &cfg.pid_dir] {
        std::fs::create_dir_all(dir).unwrap();
    }
    cfg
}

pub fn enable(cfg: &SupervisorConfig, file_name: &str, body: &str) {
    std::fs::write(cfg.apps_enabled_dir.join(file_name), body).unwrap();
}

/// Poll until every worker reports `state`.
pub async fn wait_for_state(supervisor: &Supervisor, state: State) -> Vec<WorkerStatus> {
    let wait = async {
        loop {
            let statuses = supervisor.statuses().await;
            if !statuses.is_empty() && statuses.iter().all(|s| s.state == state) {
                return statuses;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("workers never reached {state}"))
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let wait = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("condition never became true");
}
