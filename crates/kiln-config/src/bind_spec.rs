//! Operator-supplied bind specifications of the form `HOST:DEST[:MODE]`.

use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use kiln_sandbox::{BindIntent, BindKind};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Access granted through an explicit bind.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BindMode {
    /// Read-only access (default).
    #[default]
    Ro,
    /// Read-write access.
    Rw,
}

/// Errors produced when parsing [`BindSpec`] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindSpecParseError {
    /// The `:` separating host and destination was missing.
    #[error("bind '{0}' is missing the destination separator ':'")]
    MissingDestination(String),
    /// Host or destination was empty.
    #[error("bind '{0}' has an empty host or destination path")]
    EmptyPath(String),
    /// The trailing mode was not `ro` or `rw`.
    #[error("unsupported bind mode '{0}'; expected 'ro' or 'rw'")]
    InvalidMode(String),
}

/// An explicit bind requested on the command line or in configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BindSpec {
    /// Host path.
    pub host: Utf8PathBuf,
    /// Sandbox destination.
    pub destination: Utf8PathBuf,
    /// Access mode.
    #[serde(default)]
    pub mode: BindMode,
}

impl BindSpec {
    /// Creates a new bind specification.
    #[must_use]
    pub fn new(
        host: impl Into<Utf8PathBuf>,
        destination: impl Into<Utf8PathBuf>,
        mode: BindMode,
    ) -> Self {
        Self {
            host: host.into(),
            destination: destination.into(),
            mode,
        }
    }

    /// Converts the specification into an explicit bind intent.
    #[must_use]
    pub fn intent(&self) -> BindIntent {
        BindIntent::new(
            BindKind::Explicit,
            self.host.as_std_path(),
            self.destination.as_std_path(),
            self.mode == BindMode::Rw,
        )
    }
}

impl fmt::Display for BindSpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}:{}", self.host, self.destination, self.mode)
    }
}

impl FromStr for BindSpec {
    type Err = BindSpecParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (host, rest) = input
            .split_once(':')
            .ok_or_else(|| BindSpecParseError::MissingDestination(input.to_owned()))?;
        let (destination, mode) = match rest.split_once(':') {
            Some((destination, mode_text)) => {
                let mode = BindMode::from_str(mode_text)
                    .map_err(|_| BindSpecParseError::InvalidMode(mode_text.to_owned()))?;
                (destination, mode)
            }
            None => (rest, BindMode::default()),
        };
        if host.is_empty() || destination.is_empty() {
            return Err(BindSpecParseError::EmptyPath(input.to_owned()));
        }
        Ok(Self::new(host, destination, mode))
    }
}
