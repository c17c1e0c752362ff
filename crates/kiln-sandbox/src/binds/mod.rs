//! Resolution of logical mount intents into concrete bind mounts.
//!
//! The resolver is the launcher's main line of defence against exposing
//! more of the host than intended. Host paths are canonicalised so symlinks
//! cannot redirect a bind elsewhere, sandbox paths are normalised lexically
//! so `..` cannot climb out of a mount point, and any resolution problem is
//! reported as an error rather than skipped.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::BindError;
use crate::paths::{contains_flag_separator, is_root, normalise_sandbox_path};

const BINDS_TARGET: &str = "kiln_sandbox::binds";

/// Purpose of a requested bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindKind {
    /// The build context directory.
    Workspace,
    /// A persistent build cache directory. Created on demand.
    Cache,
    /// The builder's control socket.
    BuilderEndpoint,
    /// A bind requested explicitly by the operator.
    Explicit,
    /// The invoking user's home directory. Opt-in only.
    Home,
}

impl fmt::Display for BindKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Workspace => "workspace",
            Self::Cache => "cache",
            Self::BuilderEndpoint => "builder-endpoint",
            Self::Explicit => "explicit",
            Self::Home => "home",
        };
        formatter.write_str(label)
    }
}

/// A requested mapping from a host path into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindIntent {
    kind: BindKind,
    host_path: PathBuf,
    sandbox_path: PathBuf,
    writable: bool,
}

impl BindIntent {
    /// Creates a bind intent.
    #[must_use]
    pub fn new(
        kind: BindKind,
        host_path: impl Into<PathBuf>,
        sandbox_path: impl Into<PathBuf>,
        writable: bool,
    ) -> Self {
        Self {
            kind,
            host_path: host_path.into(),
            sandbox_path: sandbox_path.into(),
            writable,
        }
    }

    /// Purpose of the bind.
    #[must_use]
    pub const fn kind(&self) -> BindKind {
        self.kind
    }

    /// Host path as supplied.
    #[must_use]
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// Sandbox path as supplied.
    #[must_use]
    pub fn sandbox_path(&self) -> &Path {
        &self.sandbox_path
    }

    /// Whether the sandbox may write through the bind.
    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }
}

/// A bind ready to hand to the isolation primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBind {
    kind: BindKind,
    host_path: PathBuf,
    sandbox_path: PathBuf,
    writable: bool,
}

impl ResolvedBind {
    /// Purpose of the originating intent, kept for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> BindKind {
        self.kind
    }

    /// Canonical host path.
    #[must_use]
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// Normalised sandbox path.
    #[must_use]
    pub fn sandbox_path(&self) -> &Path {
        &self.sandbox_path
    }

    /// Whether the bind is writable.
    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }
}

/// Resolves bind intents into an ordered, duplicate-free bind list.
///
/// Intents are processed in order and the output keeps that order. Two
/// intents naming the same destination collapse into one bind only when
/// they agree on source and mode; otherwise resolution fails.
///
/// # Errors
///
/// Returns a [`BindError`] when a source is missing or unsafe, a
/// destination is unsafe, or two intents conflict.
///
/// ```no_run
/// use kiln_sandbox::{BindIntent, BindKind, resolve_binds};
///
/// # fn main() -> Result<(), kiln_sandbox::BindError> {
/// let binds = resolve_binds(&[
///     BindIntent::new(BindKind::Workspace, "/srv/checkout", "/workspace", true),
///     BindIntent::new(BindKind::Cache, "/var/cache/kiln", "/bk-cache", true),
/// ])?;
/// assert_eq!(binds.len(), 2);
/// # Ok(()) }
/// ```
pub fn resolve_binds(intents: &[BindIntent]) -> Result<Vec<ResolvedBind>, BindError> {
    let mut resolved: Vec<ResolvedBind> = Vec::with_capacity(intents.len());

    for intent in intents {
        let candidate = resolve_intent(intent)?;
        match resolved
            .iter()
            .find(|existing| existing.sandbox_path == candidate.sandbox_path)
        {
            None => resolved.push(candidate),
            Some(existing) => check_duplicate(existing, &candidate)?,
        }
    }

    debug!(
        target: BINDS_TARGET,
        intents = intents.len(),
        binds = resolved.len(),
        "resolved bind intents"
    );
    Ok(resolved)
}

fn resolve_intent(intent: &BindIntent) -> Result<ResolvedBind, BindError> {
    if intent.kind == BindKind::Home {
        warn!(
            target: BINDS_TARGET,
            host = %intent.host_path.display(),
            destination = %intent.sandbox_path.display(),
            "home directory bind requested; the sandbox can read the user's home directory"
        );
    }

    let sandbox_path = resolve_destination(intent)?;
    let host_path = resolve_source(intent)?;
    Ok(ResolvedBind {
        kind: intent.kind,
        host_path,
        sandbox_path,
        writable: intent.writable,
    })
}

fn resolve_destination(intent: &BindIntent) -> Result<PathBuf, BindError> {
    let unsafe_destination = |reason| BindError::UnsafeDestination {
        destination: intent.sandbox_path.clone(),
        reason,
    };
    let normalised = normalise_sandbox_path(&intent.sandbox_path).map_err(unsafe_destination)?;
    if is_root(&normalised) && intent.kind != BindKind::Workspace {
        return Err(unsafe_destination(
            "only the workspace may be mapped onto the sandbox root",
        ));
    }
    Ok(normalised)
}

fn resolve_source(intent: &BindIntent) -> Result<PathBuf, BindError> {
    let path = intent.host_path.as_path();
    let unsafe_source = |reason| BindError::UnsafeSource {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_absolute() {
        return Err(unsafe_source("host path must be absolute"));
    }
    if contains_flag_separator(path) {
        return Err(unsafe_source("host path must not contain ':'"));
    }

    if intent.kind == BindKind::Cache {
        ensure_cache_directory(path)?;
    }

    let canonical = canonicalise(intent.kind, path)?;
    if is_root(&canonical) {
        return Err(unsafe_source("the host root cannot be bound into the sandbox"));
    }
    // Canonicalisation may land on a path the primitive cannot express.
    if contains_flag_separator(&canonical) {
        return Err(unsafe_source("resolved host path must not contain ':'"));
    }
    Ok(canonical)
}

fn ensure_cache_directory(path: &Path) -> Result<(), BindError> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            debug!(
                target: BINDS_TARGET,
                path = %path.display(),
                "creating cache directory"
            );
            fs::create_dir_all(path).map_err(|source| BindError::CacheCreation {
                path: path.to_path_buf(),
                source: Arc::new(source),
            })
        }
        Err(source) => Err(BindError::Canonicalisation {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }),
    }
}

fn canonicalise(kind: BindKind, path: &Path) -> Result<PathBuf, BindError> {
    fs::canonicalize(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            BindError::SourceMissing {
                kind,
                path: path.to_path_buf(),
            }
        } else {
            BindError::Canonicalisation {
                path: path.to_path_buf(),
                source: Arc::new(source),
            }
        }
    })
}

fn check_duplicate(existing: &ResolvedBind, candidate: &ResolvedBind) -> Result<(), BindError> {
    if existing.host_path != candidate.host_path {
        return Err(BindError::Conflict {
            destination: candidate.sandbox_path.clone(),
            first: existing.host_path.clone(),
            second: candidate.host_path.clone(),
        });
    }
    if existing.writable != candidate.writable {
        return Err(BindError::ModeConflict {
            source_path: candidate.host_path.clone(),
            destination: candidate.sandbox_path.clone(),
        });
    }
    debug!(
        target: BINDS_TARGET,
        destination = %candidate.sandbox_path.display(),
        "dropping duplicate bind intent"
    );
    Ok(())
}
