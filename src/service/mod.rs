pub mod plan;
pub mod worker;

pub use plan::{WorkerPlan, WorkerTimings, pid_file_for};
pub use worker::{WorkerHandle, wait_for_pid};

use crate::config::{ProcessSpec, SupervisorConfig};
use crate::control::Toolbox;

/// Build the run-time plan for `spec` and spawn its actor (not started yet).
///
/// A socket or pid file left behind by a previous run is removed first.
pub fn spawn(spec: &ProcessSpec, cfg: &SupervisorConfig, tools: Toolbox) -> WorkerHandle {
    let plan = WorkerPlan::build(spec, &cfg.pid_dir, &cfg.tools.fetch);

    if let Some(socket) = plan.socket_path() {
        match std::fs::remove_file(socket) {
            Ok(()) => log::info!("Removed stale socket {}", socket.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Cannot remove stale socket {}: {e}", socket.display()),
        }
    }

    // The daemon tool writes the pid file from its detached child, so a file
    // left by an earlier run could be read before the new one lands.
    match std::fs::remove_file(&plan.pid_file) {
        Ok(()) => log::info!("Removed stale pid file {}", plan.pid_file.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Cannot remove stale pid file {}: {e}", plan.pid_file.display()),
    }

    worker::spawn(plan, tools, WorkerTimings::from(cfg))
}
