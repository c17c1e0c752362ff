//! Layered configuration for the `kiln` sandboxed build launcher.
//!
//! [`Config`] merges, in increasing precedence, built-in defaults, a TOML
//! file named by `--config-path` or `KILN_CONFIG_PATH`, `KILN_*` environment
//! variables, and command-line flags. Logging fields carry their defaults in
//! the defaults layer; the remaining fields stay optional and their accessors
//! apply the defaults from [`defaults`].

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod bind_spec;
pub mod defaults;
mod logging;
mod mode;

pub use bind_spec::{BindMode, BindSpec, BindSpecParseError};
pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_POLICY_PATH, DEFAULT_PROBE_PROGRAM, DEFAULT_SANDBOX_BINARY,
    DEFAULT_SETUP_FAILURE_EXIT, default_isolation_logs, default_log_filter,
    default_log_filter_string, default_log_format, default_sandbox_mode,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use mode::{IsolationLogs, SandboxMode};

/// Launcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "KILN")]
#[serde(default)]
pub struct Config {
    /// Path of the YAML isolation policy.
    pub policy_path: Option<Utf8PathBuf>,
    /// Isolation primitive binary, as a path or a name looked up on `PATH`.
    pub sandbox_binary: Option<String>,
    /// Whether commands must be sandboxed.
    pub sandbox_mode: Option<SandboxMode>,
    /// Handling of the primitive's own diagnostics.
    pub isolation_logs: Option<IsolationLogs>,
    /// Exit status the primitive reserves for setup failures.
    pub setup_failure_exit: Option<i32>,
    /// Program used by visibility probes inside the sandbox.
    pub probe_program: Option<String>,
    /// Tracing filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy_path: None,
            sandbox_binary: None,
            sandbox_mode: None,
            isolation_logs: None,
            setup_failure_exit: None,
            probe_program: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Path of the isolation policy.
    #[must_use]
    pub fn policy_path(&self) -> &Utf8Path {
        self.policy_path
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(DEFAULT_POLICY_PATH))
    }

    /// Isolation primitive binary.
    #[must_use]
    pub fn sandbox_binary(&self) -> &str {
        self.sandbox_binary
            .as_deref()
            .unwrap_or(DEFAULT_SANDBOX_BINARY)
    }

    /// Sandbox mode.
    #[must_use]
    pub fn sandbox_mode(&self) -> SandboxMode {
        self.sandbox_mode.unwrap_or_else(default_sandbox_mode)
    }

    /// Handling of the primitive's diagnostics.
    #[must_use]
    pub fn isolation_logs(&self) -> IsolationLogs {
        self.isolation_logs.unwrap_or_else(default_isolation_logs)
    }

    /// Reserved setup-failure exit status.
    #[must_use]
    pub fn setup_failure_exit(&self) -> i32 {
        self.setup_failure_exit
            .unwrap_or(DEFAULT_SETUP_FAILURE_EXIT)
    }

    /// Probe program.
    #[must_use]
    pub fn probe_program(&self) -> &str {
        self.probe_program
            .as_deref()
            .unwrap_or(DEFAULT_PROBE_PROGRAM)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
