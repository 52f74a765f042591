//! Messages exchanged between the supervisor and the worker actors.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::state_machine::State;

/// Commands understood by a worker actor.
///
/// The first four come from the supervisor. The rest are reports from the
/// worker's own background tasks and carry the generation of the start
/// sequence that produced them, so reports from a cancelled sequence are ignored.
#[derive(Debug)]
pub enum Cmd {
    Start,
    /// Run the stop sequence, acknowledge, and end the actor.
    Stop {
        done: oneshot::Sender<()>,
    },
    CheckHealth {
        reply: oneshot::Sender<HealthOutcome>,
    },
    Status {
        reply: oneshot::Sender<WorkerStatus>,
    },
    Launched {
        generation: u64,
        code: Option<i32>,
    },
    PidFound {
        generation: u64,
        pid: i32,
    },
    StartFailed {
        generation: u64,
        error: String,
    },
}

/// Result of one health check of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// No pid tracked yet (starting, failed, or gone).
    Skipped,
    Alive,
    /// The process was gone; a new start sequence was launched.
    Restarted,
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub name: String,
    /// Unique per actor; a reload never reuses one.
    pub instance: u64,
    pub state: State,
    /// 0 while unknown.
    pub pid: i32,
    pub started: bool,
    pub pid_file: PathBuf,
    pub since: DateTime<Utc>,
}
