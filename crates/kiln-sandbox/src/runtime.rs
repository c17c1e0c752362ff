//! Platform helpers for locating the isolation primitive.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::InfraFailure;

const RUNTIME_TARGET: &str = "kiln_sandbox::runtime";

/// Resolves the isolation primitive binary before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveLocator {
    binary: String,
    search_path: Option<OsString>,
}

impl PrimitiveLocator {
    /// Creates a locator for `binary`, either a path or a bare name looked up
    /// on `PATH`.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            search_path: None,
        }
    }

    /// Replaces the `PATH` value used for bare names.
    #[must_use]
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Binary as configured.
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Resolves the binary to an executable regular file.
    ///
    /// # Errors
    ///
    /// Returns [`InfraFailure::BinaryMissing`] when no executable file
    /// matches.
    pub fn locate(&self) -> Result<PathBuf, InfraFailure> {
        if self.binary.is_empty() {
            return Err(self.missing("no binary configured"));
        }

        if self.binary.contains('/') {
            return which::which(&self.binary)
                .map_err(|error| self.missing(&format!("not an executable file: {error}")));
        }

        // Only absolute PATH entries are searched.
        let search_path = self
            .search_path
            .clone()
            .or_else(|| env::var_os("PATH"))
            .unwrap_or_default();
        let absolute =
            env::join_paths(env::split_paths(&search_path).filter(|dir| dir.is_absolute()))
                .map_err(|error| self.missing(&format!("invalid search path: {error}")))?;
        let path = which::which_in(&self.binary, Some(absolute), Path::new("/"))
            .map_err(|error| self.missing(&format!("not found on PATH: {error}")))?;
        debug!(
            target: RUNTIME_TARGET,
            binary = %self.binary,
            path = %path.display(),
            "located isolation primitive"
        );
        Ok(path)
    }

    fn missing(&self, detail: &str) -> InfraFailure {
        InfraFailure::BinaryMissing {
            binary: self.binary.clone(),
            detail: detail.to_owned(),
        }
    }
}
