//! Domain errors raised while preparing and launching sandboxed builds.
//!
//! Every error is tagged with the [`Stage`] that produced it so the CLI can
//! tell operators whether the policy, the bind list, or the isolation
//! primitive needs attention. IO errors are wrapped in `Arc` to keep the
//! enums cheap to clone and small on the stack.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::binds::BindKind;

/// Pipeline stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Loading or validating the isolation policy.
    Policy,
    /// Resolving bind intents into concrete mounts.
    Binds,
    /// Locating, configuring, or running the isolation primitive.
    Sandbox,
    /// The sandboxed command itself.
    Command,
}

impl fmt::Display for Stage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Policy => "policy",
            Self::Binds => "binds",
            Self::Sandbox => "sandbox",
            Self::Command => "command",
        };
        formatter.write_str(label)
    }
}

/// Errors raised while loading or validating an isolation policy.
#[derive(Debug, Clone, Error)]
pub enum PolicyError {
    /// The referenced policy file does not exist.
    #[error("policy file {path} does not exist")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The policy file exists but could not be read.
    #[error("failed to read policy file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The policy document is not well-formed.
    #[error("failed to parse policy {origin}: {message}")]
    Parse {
        /// Where the policy text came from.
        origin: String,
        /// Parser diagnostic.
        message: String,
    },

    /// The policy is well-formed but incomplete or self-contradictory.
    #[error("policy {origin} is invalid: {reason}")]
    Validation {
        /// Where the policy text came from.
        origin: String,
        /// Human-readable description of the violated rule.
        reason: String,
    },
}

/// Errors raised while resolving bind intents.
#[derive(Debug, Clone, Error)]
pub enum BindError {
    /// A required bind source does not exist on the host.
    #[error("{kind} bind source {path} does not exist")]
    SourceMissing {
        /// Intent that referenced the path.
        kind: BindKind,
        /// Host path as supplied.
        path: PathBuf,
    },

    /// Two intents map different host paths onto one sandbox destination.
    #[error("bind destination {destination} is claimed by both {first} and {second}")]
    Conflict {
        /// Contested sandbox path.
        destination: PathBuf,
        /// Host source of the earlier intent.
        first: PathBuf,
        /// Host source of the later intent.
        second: PathBuf,
    },

    /// The same mapping was requested both read-only and writable.
    #[error("bind {source_path} -> {destination} is requested both read-only and writable")]
    ModeConflict {
        /// Host source shared by both intents.
        source_path: PathBuf,
        /// Sandbox destination shared by both intents.
        destination: PathBuf,
    },

    /// The sandbox destination is empty, relative, traversing, or shadows `/`.
    #[error("unsafe bind destination '{destination}': {reason}")]
    UnsafeDestination {
        /// Destination as supplied.
        destination: PathBuf,
        /// Rule the destination violates.
        reason: &'static str,
    },

    /// The host source cannot be exposed safely.
    #[error("unsafe bind source '{path}': {reason}")]
    UnsafeSource {
        /// Source as supplied.
        path: PathBuf,
        /// Rule the source violates.
        reason: &'static str,
    },

    /// Resolving the host path failed for a reason other than absence.
    #[error("failed to canonicalise bind source {path}: {source}")]
    Canonicalisation {
        /// Source as supplied.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A cache directory could not be created.
    #[error("failed to create cache directory {path}: {source}")]
    CacheCreation {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Failures of the isolation primitive itself, as opposed to the command it
/// runs.
#[derive(Debug, Clone, Error)]
pub enum InfraFailure {
    /// The isolation primitive binary could not be resolved.
    #[error("isolation primitive '{binary}' was not found ({detail})")]
    BinaryMissing {
        /// Binary name or path as configured.
        binary: String,
        /// Where the lookup went.
        detail: String,
    },

    /// Writing the rendered policy description failed.
    #[error("failed to materialise the policy description: {source}")]
    PolicyMaterialisation {
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The diagnostic log sink could not be prepared.
    #[error("failed to prepare the isolation log sink: {source}")]
    LogSink {
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Termination signal forwarding could not be installed.
    #[error("failed to install signal forwarding: {source}")]
    Signals {
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The primitive process could not be started.
    #[error("failed to start isolation primitive {binary}: {source}")]
    Spawn {
        /// Resolved binary path.
        binary: PathBuf,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Waiting for the primitive process failed.
    #[error("failed to wait for the isolation primitive: {source}")]
    Wait {
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The primitive started but refused to set up the sandbox.
    #[error("isolation primitive rejected the session (exit status {exit_code})")]
    PrimitiveRejected {
        /// Reserved setup-failure status reported by the primitive.
        exit_code: i32,
    },
}

/// Top-level error surfaced by the launcher.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// Policy loading or validation failed.
    #[error("policy: {0}")]
    Policy(#[from] PolicyError),

    /// Bind resolution failed.
    #[error("binds: {0}")]
    Bind(#[from] BindError),

    /// The command to run was malformed.
    #[error("command: {reason}")]
    InvalidCommand {
        /// Description of the problem.
        reason: String,
    },

    /// The isolation primitive could not run the session.
    #[error("sandbox: {failure}")]
    Infra {
        /// Classified infrastructure failure.
        failure: InfraFailure,
        /// Tail of the primitive's diagnostic log, when captured.
        log_excerpt: Option<String>,
    },

    /// The sandboxed command ran and exited unsuccessfully.
    #[error("command: sandboxed command exited with status {exit_code}")]
    CommandFailure {
        /// Exit status of the sandboxed command.
        exit_code: i32,
        /// Tail of the primitive's diagnostic log, when captured.
        log_excerpt: Option<String>,
    },

    /// A probe finished without a definite answer.
    #[error("probe: could not determine visibility of {path} (exit status {exit_code})")]
    ProbeInconclusive {
        /// Sandbox path that was probed.
        path: PathBuf,
        /// Exit status of the probe command.
        exit_code: i32,
    },
}

impl SandboxError {
    /// Returns the stage that produced the error.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Policy(_) => Stage::Policy,
            Self::Bind(_) => Stage::Binds,
            Self::Infra { .. } | Self::ProbeInconclusive { .. } => Stage::Sandbox,
            Self::InvalidCommand { .. } | Self::CommandFailure { .. } => Stage::Command,
        }
    }

    /// Returns true when the isolation primitive, not the command, failed.
    #[must_use]
    pub const fn is_infra(&self) -> bool {
        matches!(self, Self::Infra { .. })
    }

    /// Returns the captured diagnostic log excerpt, if any.
    #[must_use]
    pub fn log_excerpt(&self) -> Option<&str> {
        match self {
            Self::Infra { log_excerpt, .. } | Self::CommandFailure { log_excerpt, .. } => {
                log_excerpt.as_deref()
            }
            _ => None,
        }
    }

    pub(crate) fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }
}
