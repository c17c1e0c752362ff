//! Raw policy document and its validation into a [`Policy`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{FilesystemKind, MountRule, Namespaces, Policy, ResourceLimits, RootFilesystem};
use crate::endpoint::BuilderEndpoint;
use crate::error::PolicyError;
use crate::paths::{is_root, normalise_sandbox_path};

const DEFAULT_POLICY_NAME: &str = "kiln";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct PolicyDocument {
    name: Option<String>,
    namespaces: Option<NamespacesDocument>,
    root_filesystem: Option<RootDocument>,
    #[serde(default)]
    mounts: Vec<MountDocument>,
    #[serde(default)]
    caps_retained: bool,
    #[serde(default)]
    limits: ResourceLimits,
    builder_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NamespacesDocument {
    process: Option<bool>,
    mount: Option<bool>,
    network: Option<bool>,
    user: Option<bool>,
    ipc: Option<bool>,
    uts: Option<bool>,
    cgroup: Option<bool>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RootKind {
    Tmpfs,
    Directory,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RootDocument {
    kind: RootKind,
    size_mib: Option<u32>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MountDocument {
    source: Option<PathBuf>,
    destination: PathBuf,
    kind: FilesystemKind,
    #[serde(default)]
    writable: bool,
}

fn invalid(origin: &str, reason: impl Into<String>) -> PolicyError {
    PolicyError::Validation {
        origin: origin.to_owned(),
        reason: reason.into(),
    }
}

impl PolicyDocument {
    pub(super) fn validate(self, origin: &str) -> Result<Policy, PolicyError> {
        let namespaces = self
            .namespaces
            .ok_or_else(|| invalid(origin, "the namespaces section is required"))?
            .validate(origin)?;
        let root = self
            .root_filesystem
            .ok_or_else(|| invalid(origin, "root_filesystem is required"))?
            .validate(origin)?;

        if !namespaces.mount {
            return Err(invalid(
                origin,
                "the root filesystem and mount rules need the mount namespace",
            ));
        }

        let mounts = validate_mounts(origin, namespaces, self.mounts)?;

        let builder_endpoint = self
            .builder_endpoint
            .map(|text| {
                text.parse::<BuilderEndpoint>().map_err(|error| {
                    invalid(origin, format!("builder_endpoint '{text}' is invalid: {error}"))
                })
            })
            .transpose()?;
        if let Some(endpoint) = &builder_endpoint {
            check_endpoint(origin, namespaces, endpoint)?;
        }

        let name = match self.name {
            Some(name) if name.trim().is_empty() => {
                return Err(invalid(origin, "name must not be empty"));
            }
            Some(name) => name,
            None => DEFAULT_POLICY_NAME.to_owned(),
        };

        Ok(Policy {
            origin: origin.to_owned(),
            name,
            namespaces,
            root,
            mounts,
            caps_retained: self.caps_retained,
            limits: self.limits,
            builder_endpoint,
        })
    }
}

impl NamespacesDocument {
    fn validate(self, origin: &str) -> Result<Namespaces, PolicyError> {
        let facet = |value: Option<bool>, label: &str| {
            value.ok_or_else(|| {
                invalid(
                    origin,
                    format!("namespace facet '{label}' must be stated explicitly"),
                )
            })
        };
        Ok(Namespaces {
            process: facet(self.process, "process")?,
            mount: facet(self.mount, "mount")?,
            network: facet(self.network, "network")?,
            user: facet(self.user, "user")?,
            ipc: facet(self.ipc, "ipc")?,
            uts: facet(self.uts, "uts")?,
            cgroup: facet(self.cgroup, "cgroup")?,
        })
    }
}

impl RootDocument {
    fn validate(self, origin: &str) -> Result<RootFilesystem, PolicyError> {
        match (self.kind, self.path) {
            (RootKind::Tmpfs, None) => Ok(RootFilesystem::Tmpfs {
                size_mib: self.size_mib,
            }),
            (RootKind::Tmpfs, Some(_)) => Err(invalid(origin, "a tmpfs root takes no path")),
            (RootKind::Directory, None) => Err(invalid(origin, "a directory root needs a path")),
            (RootKind::Directory, Some(_)) if self.size_mib.is_some() => {
                Err(invalid(origin, "size_mib only applies to a tmpfs root"))
            }
            (RootKind::Directory, Some(requested)) => Ok(RootFilesystem::Directory {
                path: validate_root_directory(origin, &requested)?,
            }),
        }
    }
}

fn validate_root_directory(origin: &str, path: &Path) -> Result<PathBuf, PolicyError> {
    if !path.is_absolute() {
        return Err(invalid(
            origin,
            format!("root directory {} must be absolute", path.display()),
        ));
    }
    let canonical = fs::canonicalize(path).map_err(|error| {
        invalid(
            origin,
            format!("root directory {} cannot be resolved: {error}", path.display()),
        )
    })?;
    if is_root(&canonical) {
        return Err(invalid(origin, "the host root cannot be the sandbox root"));
    }
    if !canonical.is_dir() {
        return Err(invalid(
            origin,
            format!("root directory {} is not a directory", canonical.display()),
        ));
    }
    Ok(canonical)
}

fn validate_mounts(
    origin: &str,
    namespaces: Namespaces,
    documents: Vec<MountDocument>,
) -> Result<Vec<MountRule>, PolicyError> {
    let mut seen = HashSet::new();
    let mut mounts = Vec::with_capacity(documents.len());

    for document in documents {
        let destination = normalise_sandbox_path(&document.destination).map_err(|reason| {
            invalid(
                origin,
                format!(
                    "mount destination '{}' is unsafe: {reason}",
                    document.destination.display()
                ),
            )
        })?;
        if is_root(&destination) {
            return Err(invalid(origin, "a static mount cannot replace the sandbox root"));
        }
        if !seen.insert(destination.clone()) {
            return Err(invalid(
                origin,
                format!("mount destination {} is declared twice", destination.display()),
            ));
        }

        let kind = document.kind;
        match (&document.source, kind.needs_source()) {
            (None, true) => {
                return Err(invalid(
                    origin,
                    format!("{} mount at {} needs a source", kind.fstype(), destination.display()),
                ));
            }
            (Some(_), false) => {
                return Err(invalid(
                    origin,
                    format!(
                        "{} mount at {} takes no source",
                        kind.fstype(),
                        destination.display()
                    ),
                ));
            }
            (Some(source), true) if !source.is_absolute() => {
                return Err(invalid(
                    origin,
                    format!("mount source {} must be absolute", source.display()),
                ));
            }
            _ => {}
        }

        if kind == FilesystemKind::Proc && !namespaces.process {
            return Err(invalid(
                origin,
                "a proc mount without the process namespace would expose host processes",
            ));
        }

        mounts.push(MountRule {
            source: document.source,
            destination,
            kind,
            writable: document.writable,
        });
    }
    Ok(mounts)
}

pub(super) fn check_endpoint(
    origin: &str,
    namespaces: Namespaces,
    endpoint: &BuilderEndpoint,
) -> Result<(), PolicyError> {
    if endpoint.requires_host_network() && namespaces.network {
        return Err(invalid(
            origin,
            format!("builder endpoint {endpoint} is unreachable while network isolation is enabled"),
        ));
    }
    Ok(())
}
