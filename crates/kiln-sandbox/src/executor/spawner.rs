//! Process spawning on the host.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use tracing::debug;

use super::{ChildExit, EXECUTOR_TARGET, Spawner};
use crate::error::InfraFailure;
use crate::session::Invocation;
use crate::signals::SignalForwarder;

/// Spawns real processes with inherited stdio and forwards termination
/// signals to them until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn run(&self, invocation: &Invocation) -> Result<ChildExit, InfraFailure> {
        let forwarder = SignalForwarder::install()?;
        let mut child =
            invocation
                .to_command()
                .spawn()
                .map_err(|source| InfraFailure::Spawn {
                    binary: invocation.program().to_path_buf(),
                    source: Arc::new(source),
                })?;
        forwarder.attach(child.id());
        debug!(target: EXECUTOR_TARGET, pid = child.id(), "child started");

        let status = child.wait().map_err(|source| InfraFailure::Wait {
            source: Arc::new(source),
        })?;
        forwarder.detach();
        Ok(exit_of(status))
    }
}

fn exit_of(status: ExitStatus) -> ChildExit {
    match (status.code(), status.signal()) {
        (Some(code), _) => ChildExit::Exited(code),
        (None, Some(signal)) => ChildExit::Signalled(signal),
        (None, None) => ChildExit::Exited(super::NO_PROCESS_EXIT),
    }
}
