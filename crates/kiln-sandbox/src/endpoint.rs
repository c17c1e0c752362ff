//! Builder control endpoints reachable from inside the sandbox.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::binds::{BindIntent, BindKind};

/// Default sandbox-side location of a Unix builder socket.
pub const DEFAULT_BUILDER_SOCKET_DEST: &str = "/var/run/builder.sock";

/// Address of the image builder's control endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum BuilderEndpoint {
    /// Unix domain socket on the host filesystem.
    Unix {
        /// Host path of the socket.
        path: Utf8PathBuf,
    },
    /// TCP listener on the host network.
    Tcp {
        /// Host name or address.
        host: String,
        /// Listening port.
        port: u16,
    },
}

impl BuilderEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the socket path when the endpoint uses the Unix transport.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Returns true when reaching the endpoint needs the host network
    /// namespace.
    #[must_use]
    pub const fn requires_host_network(&self) -> bool {
        matches!(self, Self::Tcp { .. })
    }

    /// Returns the bind intent exposing a Unix socket at `destination`.
    ///
    /// TCP endpoints are reached over the network and need no bind.
    #[must_use]
    pub fn bind_intent(&self, destination: impl Into<PathBuf>) -> Option<BindIntent> {
        self.unix_path().map(|path| {
            BindIntent::new(
                BindKind::BuilderEndpoint,
                path.as_std_path(),
                destination,
                true,
            )
        })
    }
}

impl fmt::Display for BuilderEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for BuilderEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                if let Some(host) = url.host_str()
                    && !host.is_empty()
                {
                    return Err(EndpointParseError::UnixHost {
                        input: input.to_owned(),
                        host: host.to_owned(),
                    });
                }
                let path = url.path();
                if path.is_empty() {
                    return Err(EndpointParseError::MissingUnixPath(input.to_owned()));
                }
                let decoded = percent_decode_str(path)
                    .decode_utf8()
                    .map_err(|_| EndpointParseError::NonUtf8UnixPath(input.to_owned()))?;
                Ok(Self::unix(decoded.into_owned()))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| EndpointParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(EndpointParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Errors encountered while parsing a [`BuilderEndpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was not recognised.
    #[error("unsupported builder endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// Unix endpoint named a host; socket paths must start with `unix:///`.
    #[error("unexpected host '{host}' in Unix endpoint '{input}'; use unix:///path")]
    UnixHost {
        /// Endpoint as written.
        input: String,
        /// Host component that would otherwise swallow the first path segment.
        host: String,
    },
    /// Percent-decoded socket path was not valid UTF-8.
    #[error("Unix socket path in '{0}' is not valid UTF-8")]
    NonUtf8UnixPath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
