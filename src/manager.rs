use std::path::{Path, PathBuf};

use anyhow::Result;
use futures::future::join_all;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{self, SupervisorConfig};
use crate::control::Toolbox;
use crate::error::BootstrapError;
use crate::ipc::{HealthOutcome, WorkerStatus};
use crate::service::{self, WorkerHandle};
use crate::signals::{ControlSignal, SignalAction};

/// Whether the main loop keeps going after a control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Top‑level supervisor owning *all* worker actors.
///
/// Workers are kept in creation order. Reload, stop and health passes all run on
/// the task that owns the supervisor, so they never interleave.
pub struct Supervisor {
    cfg: SupervisorConfig,
    tools: Toolbox,
    workers: Vec<WorkerHandle>,
}

impl Supervisor {
    pub fn new(cfg: SupervisorConfig, tools: Toolbox) -> Self {
        Self {
            cfg,
            tools,
            workers: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Instance ids of the managed workers, in creation order.
    pub fn instances(&self) -> Vec<u64> {
        self.workers.iter().map(WorkerHandle::instance).collect()
    }

    /// Read every enabled definition file and start a worker for each valid item.
    ///
    /// A file that cannot be read or parsed is logged and skipped; the others are
    /// still loaded. Returns the number of workers started.
    pub async fn load_and_start(&mut self) -> usize {
        info!("Loading...");
        let mut started = 0;

        for path in enabled_files(&self.cfg.apps_enabled_dir) {
            let specs = match config::load_worker_file(&path) {
                Ok(specs) => specs,
                Err(e) => {
                    error!("{e}");
                    continue;
                }
            };

            for spec in specs {
                let worker = service::spawn(&spec, &self.cfg, self.tools.clone());
                worker.start().await;
                info!("Starting service: {} ({})", spec.name, spec.address);
                self.workers.push(worker);
                started += 1;
            }
        }

        info!("Loaded {started} workers.");
        started
    }

    /// Stop every worker in creation order. The managed set is empty afterwards.
    pub async fn stop_all(&mut self) {
        info!("Stopping...");
        for worker in self.workers.drain(..) {
            worker.stop().await;
        }
        info!("Stopped.");
    }

    /// Stop everything, then load and start from scratch.
    pub async fn reload(&mut self) -> usize {
        self.stop_all().await;
        self.load_and_start().await
    }

    /// Check every worker once. Dead workers are restarted by their actor.
    pub async fn health_check_pass(&self) -> Vec<HealthOutcome> {
        let outcomes = join_all(self.workers.iter().map(WorkerHandle::check_health)).await;
        let restarted = outcomes
            .iter()
            .filter(|o| **o == HealthOutcome::Restarted)
            .count();
        if restarted > 0 {
            info!("health check restarted {restarted} workers");
        } else {
            debug!("health check: {} workers checked", outcomes.len());
        }
        outcomes
    }

    pub async fn statuses(&self) -> Vec<WorkerStatus> {
        join_all(self.workers.iter().map(WorkerHandle::status))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Apply one control signal.
    pub async fn dispatch(&mut self, signal: ControlSignal) -> Flow {
        match signal.action() {
            SignalAction::Shutdown => {
                info!("signal {signal}, orderly shutdown");
                self.stop_all().await;
                Flow::Exit
            }
            SignalAction::Reload => {
                info!("signal {signal}, reloading");
                self.reload().await;
                Flow::Continue
            }
        }
    }

    /// Central event‑loop. Runs until a shutdown signal arrives.
    pub async fn run(mut self, mut signals: mpsc::Receiver<ControlSignal>) -> Result<()> {
        self.load_and_start().await;

        let mut health_tick = tokio::time::interval(self.cfg.health_interval());
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        health_tick.tick().await;

        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        if self.dispatch(signal).await == Flow::Exit {
                            break;
                        }
                    }
                    None => {
                        error!("signal dispatcher is gone, shutting down");
                        self.stop_all().await;
                        break;
                    }
                },
                _ = health_tick.tick() => {
                    self.health_check_pass().await;
                }
            }
        }
        Ok(())
    }
}

/// Regular files in `dir`, sorted by name. A missing or unreadable directory yields none.
pub fn enabled_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Cannot read {}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

/// Both definition directories must exist before anything starts.
pub fn check_directories(cfg: &SupervisorConfig) -> Result<(), BootstrapError> {
    for dir in [&cfg.apps_available_dir, &cfg.apps_enabled_dir] {
        if !dir.is_dir() {
            let err = BootstrapError::MissingDirectory(dir.clone());
            error!("{err}");
            return Err(err);
        }
    }
    Ok(())
}
