//! Switches controlling how strictly the launcher isolates commands.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Whether commands must run inside the sandbox.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SandboxMode {
    /// Every command runs through the isolation primitive. Setup failures are
    /// fatal.
    #[default]
    Required,
    /// Commands run directly on the host. Only ever chosen explicitly by the
    /// operator; never entered as a fallback.
    Disabled,
}

/// What happens to the isolation primitive's own diagnostics.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IsolationLogs {
    /// Capture to a temporary file and show an excerpt on failure.
    #[default]
    Capture,
    /// Let the primitive write straight to stderr.
    Stream,
}
