//! Command-line runtime for the `kiln` sandboxed build launcher.
//!
//! The runtime splits configuration flags off argv, loads the layered
//! configuration, installs telemetry and dispatches the subcommand to the
//! sandbox library. It can be driven from the binary or from tests where the
//! configuration loader, IO streams and process spawner are substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use kiln_sandbox::{Spawner, SystemSpawner};

mod cli;
mod config;
mod errors;
mod launch;
mod telemetry;

use cli::{Cli, CliCommand};
use config::{ConfigArgumentSplit, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
use launch::Launcher;

/// CLI flags recognised by the configuration loader.
///
/// Keep in sync with the fields of `kiln_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--policy-path",
    "--sandbox-binary",
    "--sandbox-mode",
    "--isolation-logs",
    "--setup-failure-exit",
    "--probe-program",
    "--log-filter",
    "--log-format",
];

/// Exit status for configuration and sandbox infrastructure failures.
pub const INFRA_FAILURE_EXIT: u8 = 125;

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) const fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader, S: Spawner + Clone> {
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
    spawner: S,
}

impl<'a, W, E, L, S> CliRunner<'a, W, E, L, S>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
    S: Spawner + Clone,
{
    const fn new(io: &'a mut IoStreams<'a, W, E>, loader: &'a L, spawner: S) -> Self {
        Self {
            io,
            loader,
            spawner,
        }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let arguments: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&arguments);

        let cli = match Cli::try_parse_from(prepare_cli_arguments(&arguments, &split)) {
            Ok(cli) => cli,
            Err(error) => return self.report_usage(&error),
        };

        match self.dispatch(cli, &split.config_arguments) {
            Ok(status) => exit_code_from_status(status),
            Err(error) => {
                self.report_failure(&error);
                error
                    .command_exit()
                    .map_or(ExitCode::from(INFRA_FAILURE_EXIT), exit_code_from_status)
            }
        }
    }

    fn dispatch(&mut self, cli: Cli, config_arguments: &[OsString]) -> Result<i32, AppError> {
        let config = self.loader.load(config_arguments)?;
        telemetry::initialise(&config)?;
        let launcher = Launcher::new(&config, self.spawner.clone());

        match cli.command {
            CliCommand::Run(args) => launcher.run(args).map(|()| 0),
            CliCommand::Probe(args) => {
                let report = launcher.probe(&args)?;
                let verdict = if report.visible() { "visible" } else { "hidden" };
                writeln!(self.io.stdout, "{verdict}: {}", report.path().display())
                    .map_err(AppError::Output)?;
                Ok(i32::from(!report.visible()))
            }
            CliCommand::RenderPolicy => {
                let rendered = launcher.render_policy()?;
                self.io
                    .stdout
                    .write_all(rendered.as_bytes())
                    .and_then(|()| self.io.stdout.flush())
                    .map_err(AppError::Output)?;
                Ok(0)
            }
        }
    }

    fn report_usage(&mut self, usage: &clap::Error) -> ExitCode {
        if usage.use_stderr() {
            let _ = write!(self.io.stderr, "{usage}");
        } else {
            let _ = write!(self.io.stdout, "{usage}");
        }
        exit_code_from_status(usage.exit_code())
    }

    /// Reports a failure on stderr.
    ///
    /// A failing sandboxed command already explains itself, so only the
    /// primitive's log tail is added for it.
    fn report_failure(&mut self, error: &AppError) {
        if error.command_exit().is_none() {
            let _ = writeln!(self.io.stderr, "kiln: {error}");
        }
        if let Some(excerpt) = error.log_excerpt() {
            let _ = writeln!(self.io.stderr, "kiln: isolation log (tail):\n{excerpt}");
        }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with(args, &mut io, &OrthoConfigLoader, SystemSpawner)
}

/// Runs the CLI with a custom configuration loader and spawner.
pub(crate) fn run_with<'a, I, W, E, L, S>(
    args: I,
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
    spawner: S,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
    S: Spawner + Clone,
{
    CliRunner::new(io, loader, spawner).run(args)
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.get(split.command_start..).unwrap_or_default())
        .cloned()
        .collect()
}

/// Maps a process status onto the launcher's exit code.
///
/// Statuses outside `0..=255` cannot be reported faithfully and become
/// [`INFRA_FAILURE_EXIT`].
fn exit_code_from_status(status: i32) -> ExitCode {
    u8::try_from(status).map_or(ExitCode::from(INFRA_FAILURE_EXIT), ExitCode::from)
}

#[cfg(test)]
mod tests;
