//! Execution of sandbox sessions through the isolation primitive.
//!
//! The executor resolves the primitive binary, writes the rendered policy to
//! a private temporary file, prepares the log sink, and hands the rendered
//! [`Invocation`] to a [`Spawner`]. The child's exit status is then
//! classified: a status equal to the primitive's reserved setup-failure code
//! is an infrastructure failure, anything else belongs to the command.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info, warn};

use crate::error::{InfraFailure, SandboxError};
use crate::runtime::PrimitiveLocator;
use crate::session::{Invocation, LogSink, SandboxSession};

mod logs;
mod spawner;

pub use logs::EXCERPT_LIMIT;
pub use spawner::SystemSpawner;

const EXECUTOR_TARGET: &str = "kiln_sandbox::executor";

/// Exit status the primitive reserves for its own setup failures.
pub const DEFAULT_SETUP_FAILURE_EXIT: i32 = 255;

/// Exit code reported when no process ran.
pub const NO_PROCESS_EXIT: i32 = -1;

/// How a spawned process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// The process exited with a status code.
    Exited(i32),
    /// The process was killed by a signal.
    Signalled(i32),
}

impl ChildExit {
    /// Shell-style exit code: the status, or `128 + signal`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signalled(signal) => 128_i32.saturating_add(signal),
        }
    }
}

/// Starts a rendered invocation and waits for it to finish.
#[cfg_attr(test, mockall::automock)]
pub trait Spawner {
    /// Runs the invocation to completion with inherited stdio.
    ///
    /// # Errors
    ///
    /// Returns [`InfraFailure::Spawn`] or [`InfraFailure::Wait`] when the
    /// process cannot be started or observed.
    fn run(&self, invocation: &Invocation) -> Result<ChildExit, InfraFailure>;
}

/// Outcome of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    exit_code: i32,
    infra_failure: Option<InfraFailure>,
    log_excerpt: Option<String>,
}

impl ExecutionResult {
    fn infra(failure: InfraFailure, exit_code: i32, log_excerpt: Option<String>) -> Self {
        Self {
            exit_code,
            infra_failure: Some(failure),
            log_excerpt,
        }
    }

    /// Exit code of the sandboxed command, or the primitive's status when it
    /// failed. [`NO_PROCESS_EXIT`] when nothing ran.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Returns true when the primitive, not the command, failed.
    #[must_use]
    pub const fn sandbox_infra_failure(&self) -> bool {
        self.infra_failure.is_some()
    }

    /// Classified infrastructure failure, if any.
    #[must_use]
    pub const fn infra_failure(&self) -> Option<&InfraFailure> {
        self.infra_failure.as_ref()
    }

    /// Tail of the primitive's diagnostic log, attached on failure.
    #[must_use]
    pub fn log_excerpt(&self) -> Option<&str> {
        self.log_excerpt.as_deref()
    }

    /// Returns true when the command ran and exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.infra_failure.is_none() && self.exit_code == 0
    }

    /// Converts the result into a launcher outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Infra`] for primitive failures and
    /// [`SandboxError::CommandFailure`] for non-zero command exits.
    pub fn into_outcome(self) -> Result<(), SandboxError> {
        if let Some(failure) = self.infra_failure {
            return Err(SandboxError::Infra {
                failure,
                log_excerpt: self.log_excerpt,
            });
        }
        if self.exit_code == 0 {
            return Ok(());
        }
        Err(SandboxError::CommandFailure {
            exit_code: self.exit_code,
            log_excerpt: self.log_excerpt,
        })
    }
}

/// Runs sessions through the isolation primitive.
#[derive(Debug)]
pub struct Executor<S = SystemSpawner> {
    locator: PrimitiveLocator,
    spawner: S,
    setup_failure_exit: i32,
}

impl Executor<SystemSpawner> {
    /// Creates an executor that spawns real processes.
    #[must_use]
    pub const fn new(locator: PrimitiveLocator) -> Self {
        Self {
            locator,
            spawner: SystemSpawner,
            setup_failure_exit: DEFAULT_SETUP_FAILURE_EXIT,
        }
    }
}

impl<S: Spawner> Executor<S> {
    /// Replaces the process spawner.
    #[must_use]
    pub fn with_spawner<T: Spawner>(self, spawner: T) -> Executor<T> {
        Executor {
            locator: self.locator,
            spawner,
            setup_failure_exit: self.setup_failure_exit,
        }
    }

    /// Sets the primitive's reserved setup-failure exit status.
    #[must_use]
    pub const fn with_setup_failure_exit(mut self, code: i32) -> Self {
        self.setup_failure_exit = code;
        self
    }

    /// Runs a session to completion.
    ///
    /// Never retries without isolation: a missing primitive or any setup
    /// problem is reported as an infrastructure failure.
    #[must_use]
    pub fn execute(&self, session: SandboxSession) -> ExecutionResult {
        let binary = match self.locator.locate() {
            Ok(path) => path,
            Err(failure) => {
                warn!(
                    target: EXECUTOR_TARGET,
                    binary = %self.locator.binary(),
                    error = %failure,
                    "isolation primitive unavailable; refusing to run unsandboxed"
                );
                return ExecutionResult::infra(failure, NO_PROCESS_EXIT, None);
            }
        };

        let policy_file = match materialise_policy(&session) {
            Ok(file) => file,
            Err(failure) => return ExecutionResult::infra(failure, NO_PROCESS_EXIT, None),
        };
        let log = match PreparedLog::prepare(session.log_sink()) {
            Ok(log) => log,
            Err(failure) => return ExecutionResult::infra(failure, NO_PROCESS_EXIT, None),
        };

        let invocation = session.invocation(&binary, policy_file.path(), log.path());
        info!(
            target: EXECUTOR_TARGET,
            binary = %binary.display(),
            program = %session.command().program(),
            workdir = %session.workdir().display(),
            binds = session.binds().len(),
            "launching sandboxed command"
        );

        let result = self.classify(self.spawner.run(&invocation), &log);
        drop(policy_file);
        result
    }

    /// Runs an invocation directly on the host, without isolation.
    ///
    /// Only used when sandboxing has been disabled explicitly.
    #[must_use]
    pub fn execute_direct(&self, invocation: &Invocation) -> ExecutionResult {
        warn!(
            target: EXECUTOR_TARGET,
            program = %invocation.program().display(),
            "running command WITHOUT sandbox isolation"
        );
        match self.spawner.run(invocation) {
            Ok(exit) => ExecutionResult {
                exit_code: exit.code(),
                infra_failure: None,
                log_excerpt: None,
            },
            Err(failure) => ExecutionResult::infra(failure, NO_PROCESS_EXIT, None),
        }
    }

    fn classify(
        &self,
        outcome: Result<ChildExit, InfraFailure>,
        log: &PreparedLog,
    ) -> ExecutionResult {
        match outcome {
            Err(failure) => {
                warn!(target: EXECUTOR_TARGET, error = %failure, "isolation primitive failed");
                ExecutionResult::infra(failure, NO_PROCESS_EXIT, log.excerpt())
            }
            Ok(ChildExit::Exited(code)) if code == self.setup_failure_exit => {
                warn!(
                    target: EXECUTOR_TARGET,
                    exit_code = code,
                    "isolation primitive rejected the session"
                );
                ExecutionResult::infra(
                    InfraFailure::PrimitiveRejected { exit_code: code },
                    code,
                    log.excerpt(),
                )
            }
            Ok(exit) => {
                let exit_code = exit.code();
                debug!(target: EXECUTOR_TARGET, exit_code, "sandboxed command finished");
                let log_excerpt = if exit_code == 0 { None } else { log.excerpt() };
                ExecutionResult {
                    exit_code,
                    infra_failure: None,
                    log_excerpt,
                }
            }
        }
    }
}

fn materialise_policy(session: &SandboxSession) -> Result<NamedTempFile, InfraFailure> {
    let wrap = |source: io::Error| InfraFailure::PolicyMaterialisation {
        source: Arc::new(source),
    };
    let mut file = Builder::new()
        .prefix("kiln-policy-")
        .suffix(".cfg")
        .tempfile()
        .map_err(wrap)?;
    file.write_all(session.policy().render().as_bytes())
        .map_err(wrap)?;
    file.flush().map_err(wrap)?;
    debug!(
        target: EXECUTOR_TARGET,
        path = %file.path().display(),
        "materialised policy description"
    );
    Ok(file)
}

/// Log destination for one execution. Temporary captures are deleted on drop.
enum PreparedLog {
    Stream,
    Capture(NamedTempFile),
    Kept(PathBuf),
}

impl PreparedLog {
    fn prepare(sink: Option<&LogSink>) -> Result<Self, InfraFailure> {
        let wrap = |source: io::Error| InfraFailure::LogSink {
            source: Arc::new(source),
        };
        match sink {
            None => Ok(Self::Stream),
            Some(LogSink::Capture) => Builder::new()
                .prefix("kiln-log-")
                .suffix(".log")
                .tempfile()
                .map(Self::Capture)
                .map_err(wrap),
            Some(LogSink::File(path)) => {
                if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(wrap)?;
                }
                File::create(path).map_err(wrap)?;
                Ok(Self::Kept(path.clone()))
            }
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Self::Stream => None,
            Self::Capture(file) => Some(file.path()),
            Self::Kept(path) => Some(path),
        }
    }

    fn excerpt(&self) -> Option<String> {
        self.path().and_then(logs::read_excerpt)
    }
}

#[cfg(test)]
mod tests;
