//! Typed isolation policies.
//!
//! A [`Policy`] is parsed once from a YAML document, validated as a whole,
//! and then shared immutably by every session built from it. Loading is
//! atomic: callers receive either a fully validated policy or a
//! [`PolicyError`], never a partially populated value.
//!
//! ```yaml
//! name: hermetic
//! namespaces:
//!   process: true
//!   mount: true
//!   network: true
//!   user: true
//!   ipc: true
//!   uts: true
//!   cgroup: true
//! root_filesystem:
//!   kind: tmpfs
//!   size_mib: 512
//! mounts:
//!   - destination: /proc
//!     kind: proc
//!   - source: /etc/resolv.conf
//!     destination: /etc/resolv.conf
//!     kind: bind
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::endpoint::BuilderEndpoint;
use crate::error::PolicyError;

mod document;
mod render;

const POLICY_TARGET: &str = "kiln_sandbox::policy";

/// Where a policy document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// A YAML file on disk.
    File(PathBuf),
    /// YAML text already held in memory.
    Inline {
        /// Label used in diagnostics.
        origin: String,
        /// The YAML document.
        text: String,
    },
}

impl PolicySource {
    fn origin(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Inline { origin, .. } => origin.clone(),
        }
    }
}

/// Isolation facets toggled by a policy. `true` means the facet is
/// isolated in a fresh namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespaces {
    /// Process ID namespace.
    pub process: bool,
    /// Mount namespace.
    pub mount: bool,
    /// Network namespace; `true` denies egress.
    pub network: bool,
    /// User namespace.
    pub user: bool,
    /// System V IPC namespace.
    pub ipc: bool,
    /// Hostname namespace.
    pub uts: bool,
    /// Control group namespace.
    pub cgroup: bool,
}

/// The sandbox's view of `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootFilesystem {
    /// Ephemeral in-memory root, discarded when the sandbox exits.
    Tmpfs {
        /// Optional size cap in MiB.
        size_mib: Option<u32>,
    },
    /// A prepared root directory on the host, mounted read-only.
    Directory {
        /// Canonical host path of the root directory.
        path: PathBuf,
    },
}

/// Filesystem type of a static mount rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemKind {
    /// Bind mount of a host path.
    Bind,
    /// Fresh in-memory filesystem.
    Tmpfs,
    /// Process information filesystem.
    Proc,
    /// Device filesystem.
    Devtmpfs,
}

impl FilesystemKind {
    /// Returns true when the mount needs a host source path.
    #[must_use]
    pub const fn needs_source(self) -> bool {
        matches!(self, Self::Bind)
    }

    pub(crate) const fn fstype(self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Tmpfs => "tmpfs",
            Self::Proc => "proc",
            Self::Devtmpfs => "devtmpfs",
        }
    }
}

/// A mount baked into the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRule {
    source: Option<PathBuf>,
    destination: PathBuf,
    kind: FilesystemKind,
    writable: bool,
}

impl MountRule {
    /// Host source, absent for virtual filesystems.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Sandbox destination.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Filesystem type.
    #[must_use]
    pub const fn kind(&self) -> FilesystemKind {
        self.kind
    }

    /// Whether the mount is writable.
    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }
}

/// Resource limits applied by the isolation primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    /// Address space cap in MiB.
    pub max_memory_mib: Option<u64>,
    /// Maximum number of processes.
    pub max_processes: Option<u64>,
    /// Maximum number of open file descriptors.
    pub max_open_files: Option<u64>,
}

/// A validated, immutable isolation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    origin: String,
    name: String,
    namespaces: Namespaces,
    root: RootFilesystem,
    mounts: Vec<MountRule>,
    caps_retained: bool,
    limits: ResourceLimits,
    builder_endpoint: Option<BuilderEndpoint>,
}

impl Policy {
    /// Parses and validates a YAML policy document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] for malformed YAML or unknown fields and
    /// [`PolicyError::Validation`] for missing or contradictory settings.
    pub fn from_yaml(origin: impl Into<String>, text: &str) -> Result<Self, PolicyError> {
        let label: String = origin.into();
        let parsed = serde_saphyr::from_str::<document::PolicyDocument>(text).map_err(|error| {
            PolicyError::Parse {
                origin: label.clone(),
                message: error.to_string(),
            }
        })?;
        let policy = parsed.validate(&label)?;
        debug!(
            target: POLICY_TARGET,
            origin = %policy.origin,
            name = %policy.name,
            mounts = policy.mounts.len(),
            network_isolated = policy.namespaces.network,
            "policy loaded"
        );
        Ok(policy)
    }

    /// Label describing where the policy came from.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Name rendered into the primitive description.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace toggles.
    #[must_use]
    pub const fn namespaces(&self) -> Namespaces {
        self.namespaces
    }

    /// Root filesystem description.
    #[must_use]
    pub const fn root(&self) -> &RootFilesystem {
        &self.root
    }

    /// Static mount rules in declaration order.
    #[must_use]
    pub fn mounts(&self) -> &[MountRule] {
        &self.mounts
    }

    /// Whether privileged capabilities survive into the sandbox.
    #[must_use]
    pub const fn caps_retained(&self) -> bool {
        self.caps_retained
    }

    /// Resource limits.
    #[must_use]
    pub const fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Builder endpoint declared by the policy.
    #[must_use]
    pub const fn builder_endpoint(&self) -> Option<&BuilderEndpoint> {
        self.builder_endpoint.as_ref()
    }

    /// Checks that a builder endpoint supplied outside the policy can be
    /// reached under this policy's isolation settings.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Validation`] when a TCP endpoint is combined
    /// with network isolation.
    pub fn admit_endpoint(&self, endpoint: &BuilderEndpoint) -> Result<(), PolicyError> {
        document::check_endpoint(&self.origin, self.namespaces, endpoint)
    }

    /// Renders the policy as the primitive's protobuf text description.
    #[must_use]
    pub fn render(&self) -> String {
        render::render(self)
    }
}

/// Reads policies from their sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyLoader;

impl PolicyLoader {
    /// Loads and validates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NotFound`] when a policy file is absent,
    /// [`PolicyError::Read`] when it cannot be read, and the errors of
    /// [`Policy::from_yaml`] otherwise.
    pub fn load(source: &PolicySource) -> Result<Policy, PolicyError> {
        match source {
            PolicySource::File(path) => {
                let text = fs::read_to_string(path).map_err(|error| {
                    if error.kind() == io::ErrorKind::NotFound {
                        PolicyError::NotFound { path: path.clone() }
                    } else {
                        PolicyError::Read {
                            path: path.clone(),
                            source: Arc::new(error),
                        }
                    }
                })?;
                Policy::from_yaml(source.origin(), &text)
            }
            PolicySource::Inline { origin, text } => Policy::from_yaml(origin.clone(), text),
        }
    }
}
