//! Forwarding of termination signals to the sandboxed process.
//!
//! The launcher installs the forwarder before spawning so nothing is lost
//! between fork and attach: signals arriving before [`SignalForwarder::attach`]
//! are queued and delivered once the child's pid is known. The launcher
//! itself never exits on these signals while a child runs; it keeps waiting
//! so the primitive can tear the sandbox down.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, warn};

use crate::error::InfraFailure;

const SIGNALS_TARGET: &str = "kiln_sandbox::signals";

/// Signals relayed to the child.
pub const FORWARDED_SIGNALS: [i32; 4] = [SIGINT, SIGTERM, SIGHUP, SIGQUIT];

#[derive(Debug, Default)]
struct ForwardState {
    child: Option<Pid>,
    pending: Vec<Signal>,
}

impl ForwardState {
    fn deliver_or_queue(&mut self, signal: Signal) {
        match self.child {
            Some(pid) => deliver(pid, signal),
            None => {
                debug!(target: SIGNALS_TARGET, %signal, "queueing signal until the child starts");
                self.pending.push(signal);
            }
        }
    }
}

fn deliver(pid: Pid, signal: Signal) {
    debug!(target: SIGNALS_TARGET, %signal, %pid, "forwarding signal");
    if let Err(errno) = kill(pid, signal) {
        warn!(
            target: SIGNALS_TARGET,
            %signal,
            %pid,
            error = %errno,
            "failed to forward signal"
        );
    }
}

/// Relays termination signals received by the launcher to its child.
#[derive(Debug)]
pub struct SignalForwarder {
    state: Arc<Mutex<ForwardState>>,
    handle: Handle,
    worker: Option<JoinHandle<()>>,
}

impl SignalForwarder {
    /// Installs handlers for [`FORWARDED_SIGNALS`] and starts the relay
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`InfraFailure::Signals`] when the handlers or the relay
    /// thread cannot be set up.
    pub fn install() -> Result<Self, InfraFailure> {
        let mut signals = Signals::new(FORWARDED_SIGNALS).map_err(|source| {
            InfraFailure::Signals {
                source: Arc::new(source),
            }
        })?;
        let handle = signals.handle();
        let state = Arc::new(Mutex::new(ForwardState::default()));
        let relay_state = Arc::clone(&state);

        let worker = thread::Builder::new()
            .name(String::from("kiln-signals"))
            .spawn(move || {
                for raw in signals.forever() {
                    match Signal::try_from(raw) {
                        Ok(signal) => lock(&relay_state).deliver_or_queue(signal),
                        Err(errno) => {
                            warn!(target: SIGNALS_TARGET, raw, error = %errno, "ignoring unknown signal");
                        }
                    }
                }
            })
            .map_err(|source| {
                handle.close();
                InfraFailure::Signals {
                    source: Arc::new(source),
                }
            })?;

        Ok(Self {
            state,
            handle,
            worker: Some(worker),
        })
    }

    /// Records the child's pid and flushes any queued signals to it.
    pub fn attach(&self, pid: u32) {
        let Ok(raw) = i32::try_from(pid) else {
            warn!(target: SIGNALS_TARGET, pid, "child pid out of range; signals will not be forwarded");
            return;
        };
        let child = Pid::from_raw(raw);
        let mut state = lock(&self.state);
        state.child = Some(child);
        for signal in std::mem::take(&mut state.pending) {
            deliver(child, signal);
        }
    }

    /// Stops forwarding to the current child.
    pub fn detach(&self) {
        lock(&self.state).child = None;
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!(target: SIGNALS_TARGET, "signal relay thread panicked");
        }
    }
}

fn lock(state: &Mutex<ForwardState>) -> MutexGuard<'_, ForwardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
