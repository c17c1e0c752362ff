//! Sandboxed execution of untrusted build commands.
//!
//! The `kiln-sandbox` crate re-executes a build-client command inside a
//! restricted process environment created by an external, `nsjail`-compatible
//! isolation primitive. The command can observe only what a declarative
//! [`Policy`] and an explicit list of bind mounts expose.
//!
//! A launch flows through four stages:
//! - [`PolicyLoader::load`] parses and validates the isolation policy.
//! - [`resolve_binds`] turns logical [`BindIntent`]s into canonical,
//!   conflict-free [`ResolvedBind`]s.
//! - [`build_session`] combines both with the command into a
//!   [`SandboxSession`].
//! - [`Executor::execute`] renders the primitive's invocation, runs it, and
//!   separates sandbox infrastructure failures from the command's own exit
//!   status.
//!
//! Every failure is closed: a missing primitive, an unreadable policy or an
//! unsafe bind aborts the launch before anything is spawned. There is no
//! unsandboxed fallback.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kiln_sandbox::{
//!     BindIntent, BindKind, Executor, PolicyLoader, PolicySource, PrimitiveLocator,
//!     SandboxCommand, build_session, resolve_binds,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = PolicyLoader::load(&PolicySource::File("/etc/kiln/policy.yaml".into()))?;
//! let binds = resolve_binds(&[BindIntent::new(
//!     BindKind::Workspace,
//!     "/srv/checkout",
//!     "/workspace",
//!     true,
//! )])?;
//! let command = SandboxCommand::from_argv(["docker", "build", "."])?;
//! let session = build_session(Arc::new(policy), binds, command, None);
//!
//! let result = Executor::new(PrimitiveLocator::new("nsjail")).execute(session);
//! std::process::exit(result.exit_code());
//! # }
//! ```
//!
//! [`Prober`] reuses the same pipeline to ask whether a path is visible from
//! inside the sandbox.

mod binds;
mod endpoint;
mod error;
mod executor;
mod paths;
mod policy;
mod probe;
mod runtime;
mod session;
mod signals;

pub use binds::{BindIntent, BindKind, ResolvedBind, resolve_binds};
pub use endpoint::{BuilderEndpoint, DEFAULT_BUILDER_SOCKET_DEST, EndpointParseError};
pub use error::{BindError, InfraFailure, PolicyError, SandboxError, Stage};
pub use executor::{
    ChildExit, DEFAULT_SETUP_FAILURE_EXIT, EXCERPT_LIMIT, ExecutionResult, Executor,
    NO_PROCESS_EXIT, Spawner, SystemSpawner,
};
pub use policy::{
    FilesystemKind, MountRule, Namespaces, Policy, PolicyLoader, PolicySource, ResourceLimits,
    RootFilesystem,
};
pub use probe::{DEFAULT_PROBE_PROGRAM, ProbeReport, Prober};
pub use runtime::PrimitiveLocator;
pub use session::{
    BUILDER_HOST_ENV, Invocation, LogSink, SANDBOXED_ENV, SandboxCommand, SandboxSession,
    SessionMount, WORKSPACE_ENV, build_session,
};
pub use signals::{FORWARDED_SIGNALS, SignalForwarder};

#[cfg(test)]
mod tests;
