//! Built-in defaults applied when no configuration layer sets a value.

pub use kiln_sandbox::{DEFAULT_PROBE_PROGRAM, DEFAULT_SETUP_FAILURE_EXIT};

use crate::logging::LogFormat;
use crate::mode::{IsolationLogs, SandboxMode};

/// Default location of the isolation policy.
pub const DEFAULT_POLICY_PATH: &str = "/etc/kiln/policy.yaml";

/// Default isolation primitive, looked up on `PATH`.
pub const DEFAULT_SANDBOX_BINARY: &str = "nsjail";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binary.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default log filter as an owned string, used where allocation is required
/// (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default sandbox mode.
#[must_use]
pub const fn default_sandbox_mode() -> SandboxMode {
    SandboxMode::Required
}

/// Default handling of the primitive's diagnostics.
#[must_use]
pub const fn default_isolation_logs() -> IsolationLogs {
    IsolationLogs::Capture
}
