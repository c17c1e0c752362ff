//! Visibility probes run through the real sandbox.
//!
//! A probe launches `test -e <path>` under the same policy and binds a build
//! would get, so the answer reflects what the primitive actually exposes
//! rather than what the launcher believes it configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::binds::{BindIntent, resolve_binds};
use crate::error::SandboxError;
use crate::executor::{Executor, Spawner, SystemSpawner};
use crate::paths::normalise_sandbox_path;
use crate::policy::Policy;
use crate::session::{LogSink, SandboxCommand, build_session};

const PROBE_TARGET: &str = "kiln_sandbox::probe";

/// Program used to test for a path's existence.
pub const DEFAULT_PROBE_PROGRAM: &str = "/usr/bin/test";

/// Answer of a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    path: PathBuf,
    visible: bool,
}

impl ProbeReport {
    /// Sandbox path that was probed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the path exists inside the sandbox.
    #[must_use]
    pub const fn visible(&self) -> bool {
        self.visible
    }
}

/// Checks path visibility inside a sandbox.
#[derive(Debug)]
pub struct Prober<S = SystemSpawner> {
    executor: Executor<S>,
    program: String,
}

impl<S: Spawner> Prober<S> {
    /// Creates a prober that runs through `executor`.
    #[must_use]
    pub fn new(executor: Executor<S>) -> Self {
        Self {
            executor,
            program: DEFAULT_PROBE_PROGRAM.to_owned(),
        }
    }

    /// Replaces the `test` program run inside the sandbox.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Reports whether `path` is visible inside a sandbox built from
    /// `policy` and `intents`.
    ///
    /// The policy or the intents must expose the test program itself; a
    /// sandbox that cannot exec it reports the primitive's setup failure.
    ///
    /// # Errors
    ///
    /// Returns policy-independent setup errors (bind resolution, invalid
    /// path), [`SandboxError::Infra`] when the primitive fails, and
    /// [`SandboxError::ProbeInconclusive`] for any status other than 0 or 1.
    pub fn probe(
        &self,
        policy: Arc<Policy>,
        intents: &[BindIntent],
        path: impl AsRef<Path>,
    ) -> Result<ProbeReport, SandboxError> {
        let requested = path.as_ref();
        let target = normalise_sandbox_path(requested).map_err(|reason| {
            SandboxError::invalid_command(format!(
                "probe path '{}' is invalid: {reason}",
                requested.display()
            ))
        })?;

        let binds = resolve_binds(intents)?;
        let command = SandboxCommand::new(self.program.clone())
            .arg("-e")
            .arg(target.display().to_string())
            .with_workdir("/")?;
        let session = build_session(policy, binds, command, Some(LogSink::Capture));

        let result = self.executor.execute(session);
        if let Some(failure) = result.infra_failure() {
            return Err(SandboxError::Infra {
                failure: failure.clone(),
                log_excerpt: result.log_excerpt().map(str::to_owned),
            });
        }

        let visible = match result.exit_code() {
            0 => true,
            1 => false,
            exit_code => {
                return Err(SandboxError::ProbeInconclusive {
                    path: target,
                    exit_code,
                });
            }
        };
        info!(
            target: PROBE_TARGET,
            path = %target.display(),
            visible,
            "probe finished"
        );
        Ok(ProbeReport {
            path: target,
            visible,
        })
    }
}
