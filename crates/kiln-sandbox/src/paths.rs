//! Lexical checks for paths handed to the isolation primitive.

use std::path::{Component, Path, PathBuf};

/// Separator used by the primitive's `host:destination` bind flags.
const FLAG_SEPARATOR: char = ':';

/// Normalises a sandbox-side path.
///
/// The path must be absolute and free of `..` components. Repeated
/// separators and `.` components are dropped. `/` is returned unchanged;
/// callers decide whether the sandbox root is an acceptable target.
pub(crate) fn normalise_sandbox_path(path: &Path) -> Result<PathBuf, &'static str> {
    if path.as_os_str().is_empty() {
        return Err("path is empty");
    }
    if !path.is_absolute() {
        return Err("path must be absolute");
    }
    if contains_flag_separator(path) {
        return Err("path must not contain ':'");
    }

    let mut normalised = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => normalised.push(part),
            Component::ParentDir => return Err("path must not traverse with '..'"),
            Component::Prefix(_) => return Err("path prefixes are not supported"),
        }
    }
    Ok(normalised)
}

/// Returns true when the path is the sandbox root.
pub(crate) fn is_root(path: &Path) -> bool {
    path.parent().is_none() && path.has_root()
}

/// Returns true when the path cannot be expressed in a bind flag.
pub(crate) fn contains_flag_separator(path: &Path) -> bool {
    path.to_string_lossy().contains(FLAG_SEPARATOR)
}
