//! CLI entrypoint for the `kiln` sandboxed build launcher.
//!
//! The binary delegates to [`kiln_cli::run`], which loads configuration,
//! parses the command line and launches the requested command inside the
//! configured isolation primitive.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    kiln_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
