//! Path helpers for `path` and `pathList` properties

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` segments and fold `..` where possible
pub fn clean_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    result.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    result.pop();
                } else if !result.has_root() {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Resolve `value` against `base_dir` unless it is already absolute
pub fn resolve_path(base_dir: &Path, value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let path = Path::new(value);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    to_slash_string(&clean_path(&joined))
}

/// Render a path with forward slashes
pub fn to_slash_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
