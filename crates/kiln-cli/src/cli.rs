//! CLI argument definitions for the `kiln` launcher.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kiln_config::BindSpec;
use kiln_sandbox::DEFAULT_BUILDER_SOCKET_DEST;

/// Default sandbox destination of the workspace bind.
pub(crate) const DEFAULT_WORKSPACE_DEST: &str = "/workspace";
/// Default sandbox destination of the cache bind.
pub(crate) const DEFAULT_CACHE_DEST: &str = "/cache";

/// Command-line interface for the `kiln` sandboxed build launcher.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Launcher actions.
#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Runs a build command inside the sandbox.
    Run(RunArgs),
    /// Reports whether a path is visible from inside the sandbox.
    Probe(ProbeArgs),
    /// Prints the primitive description rendered from the policy.
    RenderPolicy,
}

/// Host paths exposed to the sandbox.
#[derive(Args, Debug, Clone)]
pub(crate) struct BindArgs {
    /// Host checkout bound read-write into the sandbox.
    #[arg(long, value_name = "DIR")]
    pub(crate) workspace: Option<PathBuf>,
    /// Sandbox destination of the workspace.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_WORKSPACE_DEST)]
    pub(crate) workspace_dest: PathBuf,
    /// Host cache directory, created when missing.
    #[arg(long, value_name = "DIR")]
    pub(crate) cache: Option<PathBuf>,
    /// Sandbox destination of the cache.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CACHE_DEST)]
    pub(crate) cache_dest: PathBuf,
    /// Builder control endpoint, overriding the policy's
    /// (`unix:///path` or `tcp://host:port`).
    #[arg(long, value_name = "URL")]
    pub(crate) builder_endpoint: Option<String>,
    /// Sandbox destination of a Unix builder socket.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_BUILDER_SOCKET_DEST)]
    pub(crate) builder_dest: PathBuf,
    /// Additional bind in `HOST:DEST[:ro|rw]` form.
    #[arg(long = "bind", value_name = "HOST:DEST[:MODE]")]
    pub(crate) binds: Vec<BindSpec>,
    /// Binds the invoking user's home directory read-only at its host path.
    #[arg(long)]
    pub(crate) mount_home: bool,
}

/// Arguments of `kiln run`.
#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Bind mounts.
    #[command(flatten)]
    pub(crate) binds: BindArgs,
    /// Environment variable passed to the command, as `KEY=VALUE`.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub(crate) env: Vec<String>,
    /// Working directory inside the sandbox.
    #[arg(long, value_name = "PATH")]
    pub(crate) workdir: Option<PathBuf>,
    /// Keeps the primitive's diagnostic log at this host path.
    #[arg(long, value_name = "PATH")]
    pub(crate) log_file: Option<PathBuf>,
    /// Command and arguments to run.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        last = true
    )]
    pub(crate) command: Vec<String>,
}

/// Arguments of `kiln probe`.
#[derive(Args, Debug)]
pub(crate) struct ProbeArgs {
    /// Bind mounts.
    #[command(flatten)]
    pub(crate) binds: BindArgs,
    /// Absolute sandbox path to test.
    #[arg(value_name = "PATH")]
    pub(crate) path: PathBuf,
}
