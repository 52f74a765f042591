//! OS signal dispatch.
//!
//! - SIGINT / SIGTERM / SIGQUIT: stop every worker, then exit
//! - SIGHUP: reload (stop everything, re-read the enabled definitions, start again)

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;

/// Signals the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Interrupt,
    Terminate,
    Quit,
    Hangup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Reload,
}

impl ControlSignal {
    pub fn action(self) -> SignalAction {
        match self {
            ControlSignal::Interrupt | ControlSignal::Terminate | ControlSignal::Quit => {
                SignalAction::Shutdown
            }
            ControlSignal::Hangup => SignalAction::Reload,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlSignal::Interrupt => "SIGINT",
            ControlSignal::Terminate => "SIGTERM",
            ControlSignal::Quit => "SIGQUIT",
            ControlSignal::Hangup => "SIGHUP",
        }
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct SignalListener {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
    sighup: Signal,
}

impl SignalListener {
    /// Register the handlers. Must be called from inside a Tokio runtime.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal. `None` once the runtime's signal driver is gone.
    pub async fn wait(&mut self) -> Option<ControlSignal> {
        tokio::select! {
            s = self.sigint.recv() => s.map(|_| ControlSignal::Interrupt),
            s = self.sigterm.recv() => s.map(|_| ControlSignal::Terminate),
            s = self.sigquit.recv() => s.map(|_| ControlSignal::Quit),
            s = self.sighup.recv() => s.map(|_| ControlSignal::Hangup),
        }
    }

    /// Forward signals to the supervisor's main loop.
    ///
    /// The task ends after forwarding a shutdown signal, or when the receiver is gone.
    pub fn spawn_dispatcher(mut self) -> mpsc::Receiver<ControlSignal> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(sig) = self.wait().await {
                log::info!("Received signal '{sig}'.");
                let exit = sig.action() == SignalAction::Shutdown;
                if tx.send(sig).await.is_err() || exit {
                    break;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_signals_shut_down_and_hangup_reloads() {
        for sig in [
            ControlSignal::Interrupt,
            ControlSignal::Terminate,
            ControlSignal::Quit,
        ] {
            assert_eq!(sig.action(), SignalAction::Shutdown, "{sig}");
        }
        assert_eq!(ControlSignal::Hangup.action(), SignalAction::Reload);
    }

    #[tokio::test]
    async fn dispatcher_forwards_a_raised_hangup() {
        let mut rx = SignalListener::new().unwrap().spawn_dispatcher();
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).unwrap();
        let got = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(ControlSignal::Hangup));
    }
}
