//! Assembly of sandbox sessions and primitive invocations.
//!
//! [`build_session`] is pure: it combines a shared policy, the resolved
//! binds and the command into a [`SandboxSession`] without touching the
//! filesystem. The session renders the primitive's argument vector through
//! [`SandboxSession::invocation`]; the executor decides where the policy
//! description and log file live.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::binds::{BindKind, ResolvedBind};
use crate::error::SandboxError;
use crate::paths::normalise_sandbox_path;
use crate::policy::{MountRule, Policy};

/// Marker telling the command it runs inside the sandbox.
pub const SANDBOXED_ENV: &str = "KILN_SANDBOXED";
/// Marker naming the sandbox path of the workspace.
pub const WORKSPACE_ENV: &str = "KILN_SANDBOX_WORKSPACE";
/// Marker pointing build clients at the builder endpoint.
pub const BUILDER_HOST_ENV: &str = "KILN_BUILDER_HOST";

/// The build command to run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl SandboxCommand {
    /// Creates a command running `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    /// Builds a command from a full argument vector.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidCommand`] when `argv` is empty or its
    /// program is blank.
    pub fn from_argv<I, S>(argv: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = argv.into_iter().map(Into::into);
        let program = parts
            .next()
            .ok_or_else(|| SandboxError::invalid_command("no command was given"))?;
        if program.trim().is_empty() {
            return Err(SandboxError::invalid_command("the program name is empty"));
        }
        Ok(Self::new(program).args(parts))
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an extra environment variable for the command.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidCommand`] when the key is empty or
    /// contains `=`.
    pub fn with_env(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, SandboxError> {
        let key: String = name.into();
        if key.is_empty() || key.contains('=') {
            return Err(SandboxError::invalid_command(format!(
                "environment variable name '{key}' is invalid"
            )));
        }
        self.env.insert(key, value.into());
        Ok(self)
    }

    /// Overrides the sandbox-side working directory.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidCommand`] when the directory is not an
    /// absolute, traversal-free path.
    pub fn with_workdir(mut self, workdir: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let requested = workdir.as_ref();
        let normalised = normalise_sandbox_path(requested).map_err(|reason| {
            SandboxError::invalid_command(format!(
                "working directory '{}' is invalid: {reason}",
                requested.display()
            ))
        })?;
        self.workdir = Some(normalised);
        Ok(self)
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Working directory override, if any.
    #[must_use]
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// Extra environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Renders an unsandboxed invocation of the command on the host.
    #[must_use]
    pub fn direct_invocation(&self, current_dir: Option<&Path>) -> Invocation {
        Invocation {
            program: PathBuf::from(&self.program),
            args: self.args.iter().map(OsString::from).collect(),
            env: self.env.clone(),
            current_dir: current_dir.map(Path::to_path_buf),
        }
    }
}

/// Destination of the isolation primitive's diagnostic log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Write to a temporary file and attach an excerpt on failure.
    Capture,
    /// Write to the given file and keep it after the run.
    File(PathBuf),
}

/// A mount as seen from inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMount<'a> {
    /// Mount declared by the policy.
    Static(&'a MountRule),
    /// Bind resolved for this session.
    Bind(&'a ResolvedBind),
}

impl SessionMount<'_> {
    /// Sandbox-side destination of the mount.
    #[must_use]
    pub fn destination(&self) -> &Path {
        match self {
            Self::Static(rule) => rule.destination(),
            Self::Bind(bind) => bind.sandbox_path(),
        }
    }

    /// Host source, absent for virtual filesystems.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        match self {
            Self::Static(rule) => rule.source(),
            Self::Bind(bind) => Some(bind.host_path()),
        }
    }

    /// Whether the sandbox may write through the mount.
    #[must_use]
    pub const fn writable(&self) -> bool {
        match self {
            Self::Static(rule) => rule.writable(),
            Self::Bind(bind) => bind.writable(),
        }
    }
}

/// Everything needed to launch one sandboxed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSession {
    policy: Arc<Policy>,
    binds: Vec<ResolvedBind>,
    command: SandboxCommand,
    workdir: PathBuf,
    environment: BTreeMap<String, String>,
    log_sink: Option<LogSink>,
}

/// Builds a session from a policy, resolved binds and a command.
///
/// The working directory is the command's override, else the workspace
/// bind's destination, else `/`. Marker variables are layered over the
/// command's environment and take precedence over caller values.
#[must_use]
pub fn build_session(
    policy: Arc<Policy>,
    binds: Vec<ResolvedBind>,
    command: SandboxCommand,
    log_sink: Option<LogSink>,
) -> SandboxSession {
    let workspace = sandbox_path_of(&binds, BindKind::Workspace);
    let workdir = command
        .workdir()
        .or(workspace)
        .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);

    let mut environment = command.env().clone();
    environment.insert(SANDBOXED_ENV.to_owned(), String::from("1"));
    if let Some(path) = workspace {
        environment.insert(WORKSPACE_ENV.to_owned(), path.display().to_string());
    }
    if let Some(path) = sandbox_path_of(&binds, BindKind::BuilderEndpoint) {
        environment.insert(
            BUILDER_HOST_ENV.to_owned(),
            format!("unix://{}", path.display()),
        );
    }

    SandboxSession {
        policy,
        binds,
        command,
        workdir,
        environment,
        log_sink,
    }
}

fn sandbox_path_of(binds: &[ResolvedBind], kind: BindKind) -> Option<&Path> {
    binds
        .iter()
        .find(|bind| bind.kind() == kind)
        .map(ResolvedBind::sandbox_path)
}

impl SandboxSession {
    /// Shared policy.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Dynamic binds in resolution order.
    #[must_use]
    pub fn binds(&self) -> &[ResolvedBind] {
        &self.binds
    }

    /// Command to run.
    #[must_use]
    pub const fn command(&self) -> &SandboxCommand {
        &self.command
    }

    /// Sandbox-side working directory.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Environment passed to the command, markers included.
    #[must_use]
    pub const fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Where the primitive writes its diagnostics.
    #[must_use]
    pub const fn log_sink(&self) -> Option<&LogSink> {
        self.log_sink.as_ref()
    }

    /// Lists the policy's static mounts followed by the session's binds.
    #[must_use]
    pub fn mounts(&self) -> Vec<SessionMount<'_>> {
        self.policy
            .mounts()
            .iter()
            .map(SessionMount::Static)
            .chain(self.binds.iter().map(SessionMount::Bind))
            .collect()
    }

    /// Renders the isolation primitive's argument vector.
    ///
    /// ```text
    /// <binary> --config <policy_file> [--log <log_file>]
    ///          (--bindmount <host>:<dest> | --bindmount_ro <host>:<dest>)*
    ///          (--env KEY=VALUE)* --cwd <workdir> -- <argv...>
    /// ```
    #[must_use]
    pub fn invocation(
        &self,
        binary: &Path,
        policy_file: &Path,
        log_file: Option<&Path>,
    ) -> Invocation {
        let mut args: Vec<OsString> = vec![OsString::from("--config"), policy_file.into()];
        if let Some(log) = log_file {
            args.push(OsString::from("--log"));
            args.push(log.into());
        }
        for bind in &self.binds {
            let flag = if bind.writable() {
                "--bindmount"
            } else {
                "--bindmount_ro"
            };
            let mut mapping = OsString::from(bind.host_path());
            mapping.push(":");
            mapping.push(bind.sandbox_path());
            args.push(OsString::from(flag));
            args.push(mapping);
        }
        for (key, value) in &self.environment {
            args.push(OsString::from("--env"));
            args.push(OsString::from(format!("{key}={value}")));
        }
        args.push(OsString::from("--cwd"));
        args.push(self.workdir.clone().into_os_string());
        args.push(OsString::from("--"));
        args.push(OsString::from(self.command.program()));
        args.extend(self.command.arguments().iter().map(OsString::from));

        Invocation {
            program: binary.to_path_buf(),
            args,
            env: BTreeMap::new(),
            current_dir: None,
        }
    }
}

/// A fully rendered process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    env: BTreeMap<String, String>,
    current_dir: Option<PathBuf>,
}

impl Invocation {
    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Variables added to the inherited environment.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Host working directory, if one is set.
    #[must_use]
    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Returns the arguments following the `--` separator.
    #[must_use]
    pub fn command_args(&self) -> &[OsString] {
        self.args
            .iter()
            .position(|arg| arg == "--")
            .and_then(|index| self.args.get(index + 1..))
            .unwrap_or(&[])
    }

    /// Builds a [`Command`] with inherited stdio.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}
