use chrono::{DateTime, Utc};

use crate::state_machine::{Action, Event, State, transition};

/// Current lifecycle state of one worker plus when it was entered.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: State,
    since: DateTime<Utc>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: State::Idle,
            since: Utc::now(),
        }
    }
}

impl Lifecycle {
    /// Apply `event`. Invalid events leave the state untouched and yield `Action::None`.
    pub fn step(&mut self, event: Event) -> Action {
        match transition(self.state, event) {
            Some((next, action)) => {
                if next != self.state {
                    self.state = next;
                    self.since = Utc::now();
                }
                action
            }
            None => {
                log::debug!("ignoring {event:?} in state {}", self.state);
                Action::None
            }
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }
}
