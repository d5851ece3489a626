//! Path resolution for watch dedup keys.

use std::path::{Component, Path, PathBuf};

use super::error::WatchError;

/// Resolve `path` to the absolute form used as a dedup key.
///
/// Relative paths are joined onto the current directory; `.` and `..` are
/// folded lexically. Symlinks are not followed and the path need not exist.
///
/// # Errors
///
/// Returns [`WatchError::Io`] if `path` is relative and the current
/// directory cannot be determined.
pub fn resolve_path(path: &Path) -> Result<PathBuf, WatchError> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir()?;
    Ok(normalize(&cwd.join(path)))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `pop` refuses to remove the root, so `/..` stays `/`
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
