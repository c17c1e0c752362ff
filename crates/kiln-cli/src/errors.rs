//! Error types and diagnostics helpers for the CLI runtime.

use std::io;
use std::sync::Arc;

use kiln_sandbox::{EndpointParseError, SandboxError};
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("config: failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("config: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("config: invalid builder endpoint: {0}")]
    BuilderEndpoint(#[from] EndpointParseError),
    #[error("command: environment entry '{0}' is not in KEY=VALUE form")]
    MalformedEnv(String),
    #[error("binds: cannot bind the home directory: it could not be determined")]
    HomeUnavailable,
    #[error("{0}")]
    Sandbox(#[from] SandboxError),
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

impl AppError {
    /// Tail of the primitive's diagnostic log attached to the failure.
    pub(crate) fn log_excerpt(&self) -> Option<&str> {
        match self {
            Self::Sandbox(error) => error.log_excerpt(),
            _ => None,
        }
    }

    /// Exit status of a sandboxed command that ran and failed.
    pub(crate) const fn command_exit(&self) -> Option<i32> {
        match self {
            Self::Sandbox(SandboxError::CommandFailure { exit_code, .. }) => Some(*exit_code),
            _ => None,
        }
    }
}
