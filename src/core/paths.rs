//! Absolute path resolution rooted at the executable's location, not the
//! current working directory. Per §4.5.1: this is non-negotiable — relative
//! paths must not break when subprocesses launch from a different cwd.

use std::env;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::{PredictorError, Result};

/// Resolve the project root as an absolute path derived from the running
/// executable's location.
///
/// Tries `env::current_exe()` followed by `fs::canonicalize` (resolving
/// symlinks, e.g. a `cargo install` shim); falls back to the unresolved
/// executable path's parent if canonicalization fails.
pub fn resolve_project_root() -> Result<PathBuf> {
    let exe = env::current_exe().map_err(|source| {
        PredictorError::io(PathBuf::from("<current_exe>"), source)
    })?;
    let exe = std::fs::canonicalize(&exe).unwrap_or(exe);
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| PredictorError::config("executable path has no parent directory"))
}

/// Resolve a path to an absolute, normalized path, relative to `base` (not cwd)
/// when `path` is relative.
///
/// If `fs::canonicalize` succeeds (the path exists), it is used to resolve
/// symlinks and normalize components. If it fails (path does not exist), the
/// path is made absolute relative to `base` and `..`/`.` components are
/// resolved syntactically.
pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
