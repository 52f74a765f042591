//! Worker lifecycle controller.
//!
//! Every managed worker is owned by one actor task. The pid, the started flag,
//! the lifecycle state and the handles of the background tasks live inside the
//! actor and are only touched from there; everybody else talks to it through
//! [`Cmd`] messages. Two kinds of background task exist per start:
//! - the start sequence (before-start hook, launch, pid discovery)
//! - the after-start hook, which waits until the pid is known
//!
//! Both are stopped cooperatively through a [`CancellationToken`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::plan::{WorkerPlan, WorkerTimings};
use crate::control::{HookRunner, LaunchRequest, Toolbox, process_exists};
use crate::error::{StartError, ToolError};
use crate::ipc::{Cmd, HealthOutcome, WorkerStatus};
use crate::lifecycle::Lifecycle;
use crate::state_machine::{Action, Event};
use crate::template::ResolvedCommand;

/// Per-worker mailbox size. Background tasks send at most three reports per start.
const CMD_BOUND: usize = 32;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Supervisor-side handle to a worker actor.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    name: String,
    instance: u64,
    tx: mpsc::Sender<Cmd>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Kick off the start sequence. Returns immediately.
    pub async fn start(&self) {
        if self.tx.send(Cmd::Start).await.is_err() {
            warn!("{} is gone, cannot start it", self.name);
        }
    }

    /// Run the stop sequence and wait for it. The actor ends afterwards.
    pub async fn stop(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Cmd::Stop { done }).await.is_ok() {
            let _ = wait.await;
        }
    }

    pub async fn check_health(&self) -> HealthOutcome {
        let (reply, wait) = oneshot::channel();
        if self.tx.send(Cmd::CheckHealth { reply }).await.is_err() {
            return HealthOutcome::Skipped;
        }
        wait.await.unwrap_or(HealthOutcome::Skipped)
    }

    pub async fn status(&self) -> Option<WorkerStatus> {
        let (reply, wait) = oneshot::channel();
        self.tx.send(Cmd::Status { reply }).await.ok()?;
        wait.await.ok()
    }
}

/// Spawn the actor for one worker. The worker stays `Idle` until started.
pub fn spawn(plan: WorkerPlan, tools: Toolbox, timings: WorkerTimings) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(CMD_BOUND);
    let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
    let handle = WorkerHandle {
        name: plan.name.clone(),
        instance,
        tx: tx.clone(),
    };

    let actor = WorkerActor {
        plan: Arc::new(plan),
        tools,
        timings,
        instance,
        rx,
        self_tx: tx.downgrade(),
        lifecycle: Lifecycle::default(),
        pid: 0,
        started: false,
        generation: 0,
        tasks: None,
    };
    tokio::spawn(actor.run());
    handle
}

struct BackgroundTasks {
    cancel: CancellationToken,
    start: JoinHandle<()>,
    after_start: Option<JoinHandle<()>>,
    started_tx: watch::Sender<Option<i32>>,
}

struct WorkerActor {
    plan: Arc<WorkerPlan>,
    tools: Toolbox,
    timings: WorkerTimings,
    instance: u64,
    rx: mpsc::Receiver<Cmd>,
    self_tx: mpsc::WeakSender<Cmd>,
    lifecycle: Lifecycle,
    pid: i32,
    started: bool,
    generation: u64,
    tasks: Option<BackgroundTasks>,
}

impl WorkerActor {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Cmd::Start => self.start(),
                Cmd::Stop { done } => {
                    self.stop().await;
                    let _ = done.send(());
                    break;
                }
                Cmd::CheckHealth { reply } => {
                    let outcome = self.check_health().await;
                    let _ = reply.send(outcome);
                }
                Cmd::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                Cmd::Launched { generation, code } if generation == self.generation => {
                    debug!("{} launcher exited with {code:?}", self.plan.name);
                    self.lifecycle.step(Event::Launched);
                }
                Cmd::PidFound { generation, pid } if generation == self.generation => {
                    self.on_pid_found(pid);
                }
                Cmd::StartFailed { generation, error } if generation == self.generation => {
                    if self.lifecycle.step(Event::StartFailed) == Action::ReportFailure {
                        error!("Start of {} failed: {error}", self.plan.name);
                    }
                }
                stale => debug!("{}: ignoring stale {stale:?}", self.plan.name),
            }
        }
        self.cancel_tasks().await;
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            name: self.plan.name.clone(),
            instance: self.instance,
            state: self.lifecycle.state(),
            pid: self.pid,
            started: self.started,
            pid_file: self.plan.pid_file.clone(),
            since: self.lifecycle.since(),
        }
    }

    fn start(&mut self) {
        if self.lifecycle.step(Event::CmdStart) != Action::SpawnProcess {
            debug!("{} is already {}", self.plan.name, self.lifecycle.state());
            return;
        }
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };

        self.generation += 1;
        let cancel = CancellationToken::new();
        let (started_tx, started_rx) = watch::channel(None);

        let start = tokio::spawn(start_sequence(
            self.plan.clone(),
            self.tools.clone(),
            self.timings,
            self.generation,
            cancel.clone(),
            tx,
        ));

        let after_start = self.plan.after_start.clone().map(|hook| {
            tokio::spawn(after_start_sequence(
                self.plan.name.clone(),
                hook,
                self.tools.runner.clone(),
                started_rx,
                cancel.clone(),
            ))
        });

        self.tasks = Some(BackgroundTasks {
            cancel,
            start,
            after_start,
            started_tx,
        });
    }

    fn on_pid_found(&mut self, pid: i32) {
        if self.lifecycle.step(Event::PidFound) != Action::NotifyStarted {
            return;
        }
        self.pid = pid;
        self.started = true;
        if let Some(tasks) = &self.tasks {
            tasks.started_tx.send_replace(Some(pid));
        }
    }

    async fn stop(&mut self) {
        if self.lifecycle.step(Event::CmdStop) != Action::RunStopSequence {
            return;
        }
        let plan = self.plan.clone();
        let pid = self.pid;
        let known_pid = (pid > 0).then_some(pid);

        // Cancel first so an in-flight start cannot outlive the stop.
        self.cancel_tasks().await;

        if let Some(hook) = &plan.before_stop {
            self.run_hook("BeforeStoppingCommand", &hook.with_pid(known_pid))
                .await;
        }

        info!("Stopping {}, PID #{pid}...", plan.name);
        stop_daemon(&self.tools, &plan).await;
        info!("Stopped {}, PID #{pid}.", plan.name);

        remove_quietly(&plan.pid_file).await;
        if let Some(socket) = plan.socket_path() {
            remove_quietly(socket).await;
        }

        if let Some(hook) = &plan.after_stop {
            self.run_hook("AfterStoppingCommand", &hook.with_pid(known_pid))
                .await;
        }

        self.pid = 0;
        self.started = false;
        self.lifecycle.step(Event::StopDone);
    }

    async fn check_health(&mut self) -> HealthOutcome {
        if self.pid == 0 || !self.lifecycle.is_running() {
            return HealthOutcome::Skipped;
        }
        if process_exists(self.pid) {
            return HealthOutcome::Alive;
        }

        info!("PID #{} not found. Restarting '{}'.", self.pid, self.plan.name);
        if self.lifecycle.step(Event::ProcessGone) != Action::Restart {
            return HealthOutcome::Skipped;
        }
        stop_daemon(&self.tools, &self.plan).await;
        // A stale pid would be picked up by the next start sequence.
        remove_quietly(&self.plan.pid_file).await;
        self.pid = 0;
        self.started = false;
        self.cancel_tasks().await;
        self.start();
        HealthOutcome::Restarted
    }

    async fn run_hook(&self, label: &str, hook: &ResolvedCommand) {
        info!("Execution <{label}> of {}...", self.plan.name);
        match self.tools.runner.run(hook, &CancellationToken::new()).await {
            Ok(out) if !out.success() => {
                warn!("<{label}> of {} exited with {:?}", self.plan.name, out.code)
            }
            Ok(_) => {}
            Err(e) => warn!("<{label}> of {} failed: {e}", self.plan.name),
        }
        info!("Executed <{label}> of {}.", self.plan.name);
    }

    /// Signal cancellation and wait for the background tasks, aborting stragglers.
    async fn cancel_tasks(&mut self) {
        let Some(tasks) = self.tasks.take() else {
            return;
        };
        tasks.cancel.cancel();
        let grace = self.timings.task_join_grace;
        join_or_abort(&self.plan.name, "start", tasks.start, grace).await;
        if let Some(after_start) = tasks.after_start {
            join_or_abort(&self.plan.name, "<AfterStartingCommand>", after_start, grace).await;
        }
    }
}

async fn join_or_abort(name: &str, what: &str, mut handle: JoinHandle<()>, grace: Duration) {
    if handle.is_finished() {
        return;
    }
    if tokio::time::timeout(grace, &mut handle).await.is_err() {
        warn!("Killing {what} task of {name}.");
        handle.abort();
    }
}

async fn stop_daemon(tools: &Toolbox, plan: &WorkerPlan) {
    match tools.launcher.stop(&plan.pid_file, plan.stop_timeout).await {
        Ok(out) if !out.success() => {
            warn!("Stopping {} exited with {:?}", plan.name, out.code)
        }
        Ok(_) => {}
        Err(e) => error!("Cannot stop {}: {e}", plan.name),
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Cannot remove {}: {e}", path.display()),
    }
}

async fn start_sequence(
    plan: Arc<WorkerPlan>,
    tools: Toolbox,
    timings: WorkerTimings,
    generation: u64,
    cancel: CancellationToken,
    tx: mpsc::Sender<Cmd>,
) {
    let report = match run_start(&plan, &tools, &timings, generation, &cancel, &tx).await {
        Ok(pid) => Cmd::PidFound { generation, pid },
        Err(e) if e.is_cancelled() => {
            info!("Start of {} cancelled.", plan.name);
            return;
        }
        Err(e) => Cmd::StartFailed {
            generation,
            error: e.to_string(),
        },
    };
    let _ = tx.send(report).await;
}

async fn run_start(
    plan: &WorkerPlan,
    tools: &Toolbox,
    timings: &WorkerTimings,
    generation: u64,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<Cmd>,
) -> Result<i32, StartError> {
    if let Some(hook) = &plan.before_start {
        info!("Execution <BeforeStartingCommand> of {}...", plan.name);
        match tools.runner.run(hook, cancel).await {
            Err(ToolError::Cancelled(_)) => return Err(StartError::Cancelled),
            Err(e) => warn!("<BeforeStartingCommand> of {} failed: {e}", plan.name),
            Ok(out) if !out.success() => warn!(
                "<BeforeStartingCommand> of {} exited with {:?}",
                plan.name, out.code
            ),
            Ok(_) => {}
        }
        info!("Executed <BeforeStartingCommand> of {}.", plan.name);
    }

    info!("Starting {}...", plan.name);
    let request = LaunchRequest::new(&plan.command, &plan.pid_file);
    let out = tools.launcher.start(&request, cancel).await?;
    if !out.success() {
        warn!("Launcher for {} exited with {:?}", plan.name, out.code);
    }
    let _ = tx
        .send(Cmd::Launched {
            generation,
            code: out.code,
        })
        .await;
    info!("Started {}.", plan.name);

    info!("Waiting PID of {}...", plan.name);
    let pid = wait_for_pid(
        &plan.pid_file,
        timings.pid_poll_interval,
        timings.pid_wait_timeout,
        cancel,
    )
    .await?;
    info!("PID of worker {} is #{pid}.", plan.name);
    Ok(pid)
}

async fn after_start_sequence(
    name: String,
    hook: ResolvedCommand,
    runner: Arc<dyn HookRunner>,
    mut started: watch::Receiver<Option<i32>>,
    cancel: CancellationToken,
) {
    let pid = tokio::select! {
        _ = cancel.cancelled() => return,
        pid = started_pid(&mut started) => match pid {
            Some(pid) => pid,
            None => return,
        },
    };

    info!("Execution <AfterStartingCommand> of {name}...");
    match runner.run(&hook.with_pid(Some(pid)), &cancel).await {
        Ok(out) if !out.success() => {
            warn!("<AfterStartingCommand> of {name} exited with {:?}", out.code)
        }
        Ok(_) => {}
        Err(ToolError::Cancelled(_)) => {
            info!("<AfterStartingCommand> of {name} cancelled.");
            return;
        }
        Err(e) => warn!("<AfterStartingCommand> of {name} failed: {e}"),
    }
    info!("Executed <AfterStartingCommand> of {name}.");
}

async fn started_pid(started: &mut watch::Receiver<Option<i32>>) -> Option<i32> {
    match started.wait_for(Option::is_some).await {
        Ok(pid) => *pid,
        Err(_) => None,
    }
}

/// Poll until the pid file exists and holds a pid on its first line.
///
/// A file that exists but is still empty counts as not written yet.
pub async fn wait_for_pid(
    path: &Path,
    poll: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<i32, StartError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(pid) = read_pid_file(path).await? {
            return Ok(pid);
        }
        if Instant::now() >= deadline {
            return Err(StartError::PidTimeout {
                path: path.to_path_buf(),
                waited: timeout,
            });
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(StartError::Cancelled),
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

async fn read_pid_file(path: &Path) -> Result<Option<i32>, StartError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StartError::PidRead {
                path: PathBuf::from(path),
                source,
            });
        }
    };
    let line = text.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return Ok(None);
    }
    match line.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(StartError::PidParse {
            path: path.to_path_buf(),
            content: line.to_string(),
        }),
    }
}
