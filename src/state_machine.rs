//! Per-worker lifecycle states and the transitions between them.
//!
//! ```text
//! Idle ─► Starting ─► WaitingForPid ─► Running ─► Stopping ─► Stopped
//!            │              │             │
//!            └──────┬───────┘             ▼
//!                   ▼                  Crashed ─► Starting
//!                 Failed
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    Starting,
    WaitingForPid,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Failed,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Starting => "starting",
            State::WaitingForPid => "waiting-for-pid",
            State::Running => "running",
            State::Stopping => "stopping",
            State::Stopped => "stopped",
            State::Crashed => "crashed",
            State::Failed => "failed",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    CmdStart,
    /// The daemon tool returned; the pid file is next.
    Launched,
    PidFound,
    StartFailed,
    /// Health check found no process for the tracked pid.
    ProcessGone,
    CmdStop,
    StopDone,
}

/// What the owner of the state machine has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    SpawnProcess,
    NotifyStarted,
    ReportFailure,
    Restart,
    RunStopSequence,
}

/// Pure transition function. `None` means the event is not valid in `state`.
pub fn transition(state: State, event: Event) -> Option<(State, Action)> {
    use Event as E;
    use State as S;

    let next = match (state, event) {
        (S::Idle | S::Stopped | S::Failed | S::Crashed, E::CmdStart) => {
            (S::Starting, Action::SpawnProcess)
        }
        (S::Starting, E::Launched) => (S::WaitingForPid, Action::None),
        (S::WaitingForPid, E::PidFound) => (S::Running, Action::NotifyStarted),
        (S::Starting | S::WaitingForPid, E::StartFailed) => (S::Failed, Action::ReportFailure),
        (S::Running, E::ProcessGone) => (S::Crashed, Action::Restart),
        (S::Stopping | S::Stopped, E::CmdStop) => return None,
        (_, E::CmdStop) => (S::Stopping, Action::RunStopSequence),
        (S::Stopping, E::StopDone) => (S::Stopped, Action::None),
        _ => return None,
    };
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_running_then_stopped() {
        let mut state = State::Idle;
        let mut actions = Vec::new();
        for event in [
            Event::CmdStart,
            Event::Launched,
            Event::PidFound,
            Event::CmdStop,
            Event::StopDone,
        ] {
            let (next, action) = transition(state, event).unwrap();
            state = next;
            actions.push(action);
        }
        assert_eq!(state, State::Stopped);
        assert_eq!(
            actions,
            [
                Action::SpawnProcess,
                Action::None,
                Action::NotifyStarted,
                Action::RunStopSequence,
                Action::None
            ]
        );
    }

    #[test]
    fn crash_leads_back_to_starting() {
        let (crashed, action) = transition(State::Running, Event::ProcessGone).unwrap();
        assert_eq!((crashed, action), (State::Crashed, Action::Restart));
        let (next, _) = transition(crashed, Event::CmdStart).unwrap();
        assert_eq!(next, State::Starting);
    }

    #[test]
    fn pid_timeout_fails_the_worker() {
        assert_eq!(
            transition(State::WaitingForPid, Event::StartFailed),
            Some((State::Failed, Action::ReportFailure))
        );
    }

    #[test]
    fn invalid_events_are_rejected() {
        assert_eq!(transition(State::Running, Event::CmdStart), None);
        assert_eq!(transition(State::Idle, Event::PidFound), None);
        assert_eq!(transition(State::Stopped, Event::CmdStop), None);
        assert_eq!(transition(State::Failed, Event::ProcessGone), None);
    }
}
