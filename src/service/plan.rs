//! Turning a [`ProcessSpec`] into everything a worker needs at run time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{CommandTemplate, ProcessSpec, SupervisorConfig, unix_socket_path};
use crate::template::{self, ResolvedCommand};

/// Resolved, immutable description of one managed worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlan {
    pub name: String,
    pub address: String,
    pub pid_file: PathBuf,
    pub command: ResolvedCommand,
    pub before_start: Option<ResolvedCommand>,
    /// Still contains `{pid}`; substituted once the pid is known.
    pub after_start: Option<ResolvedCommand>,
    pub before_stop: Option<ResolvedCommand>,
    pub after_stop: Option<ResolvedCommand>,
    pub stop_timeout: Duration,
}

impl WorkerPlan {
    pub fn build(spec: &ProcessSpec, pid_dir: &Path, fetch_tool: &str) -> Self {
        let pid_file = pid_file_for(&spec.address, pid_dir);
        let hook = |reference: Option<&CommandTemplate>| {
            template::resolve_hook(reference, &spec.address, &pid_file, fetch_tool)
        };

        Self {
            name: spec.name.clone(),
            address: spec.address.clone(),
            command: template::resolve(&spec.command, &spec.address, &pid_file).unwrap_or_default(),
            before_start: hook(spec.before_start.as_ref()),
            after_start: hook(spec.after_start.as_ref()),
            before_stop: hook(spec.before_stop.as_ref()),
            after_stop: hook(spec.after_stop.as_ref()),
            stop_timeout: spec.stop_timeout,
            pid_file,
        }
    }

    pub fn socket_path(&self) -> Option<&Path> {
        unix_socket_path(&self.address)
    }
}

/// `<pid_dir>/<socket file name>.pid` for unix sockets, a random name otherwise.
pub fn pid_file_for(address: &str, pid_dir: &Path) -> PathBuf {
    match unix_socket_path(address).and_then(Path::file_name) {
        Some(file_name) => {
            let mut name = file_name.to_os_string();
            name.push(".pid");
            pid_dir.join(name)
        }
        None => pid_dir.join(format!("{}.pid", uuid::Uuid::new_v4().simple())),
    }
}

/// Timing knobs of the worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTimings {
    pub pid_poll_interval: Duration,
    pub pid_wait_timeout: Duration,
    pub task_join_grace: Duration,
}

impl From<&SupervisorConfig> for WorkerTimings {
    fn from(cfg: &SupervisorConfig) -> Self {
        Self {
            pid_poll_interval: cfg.pid_poll_interval(),
            pid_wait_timeout: cfg.pid_wait_timeout(),
            task_join_grace: cfg.task_join_grace(),
        }
    }
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}
