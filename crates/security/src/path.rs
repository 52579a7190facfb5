//! Path validation: script paths confined to the script directory.
//!
//! Traversal is rejected on the raw string, before anything touches the
//! filesystem.

use std::path::{Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Script path is empty")]
    Empty,

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },
}

/// Resolve a script reference to a file path.
///
/// Steps:
/// 1. Reject empty paths and any `..` component
/// 2. Expand a leading `~`
/// 3. Resolve relative paths against `script_dir`
/// 4. Append `.json` when there is no extension
pub fn resolve_script_path(path: &str, script_dir: &Path) -> Result<PathBuf, PathValidationError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathValidationError::Empty);
    }

    let path_str = trimmed.replace('\\', "/");
    if path_str.contains("../") || path_str.contains("/..") || path_str == ".." {
        return Err(PathValidationError::PathTraversal { path: path.into() });
    }

    let expanded = PathBuf::from(expand_tilde(trimmed));
    let mut resolved = if expanded.is_absolute() {
        expanded
    } else {
        script_dir.join(expanded)
    };

    if resolved.extension().is_none() {
        resolved.set_extension("json");
    }

    Ok(resolved)
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Ok(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Result<String, ()> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").map_err(|_| ())
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_resolves_under_dir() {
        let resolved = resolve_script_path("login", Path::new("scripts")).unwrap();
        assert_eq!(resolved, PathBuf::from("scripts/login.json"));
    }

    #[test]
    fn existing_extension_kept() {
        let resolved = resolve_script_path("flows/setup.json", Path::new("/opt/s")).unwrap();
        assert_eq!(resolved, PathBuf::from("/opt/s/flows/setup.json"));
    }

    #[test]
    fn absolute_path_not_rebased() {
        let dir = tempfile::tempdir().unwrap();
        let abs = dir.path().join("a.json");
        let resolved = resolve_script_path(abs.to_str().unwrap(), Path::new("scripts")).unwrap();
        assert_eq!(resolved, abs);
    }

    #[test]
    fn path_traversal_blocked() {
        let result = resolve_script_path("../../../etc/passwd", Path::new("scripts"));
        match result.unwrap_err() {
            PathValidationError::PathTraversal { .. } => {}
            other => panic!("Expected PathTraversal, got: {other}"),
        }
    }

    #[test]
    fn path_traversal_mid_path_blocked() {
        assert!(resolve_script_path("flows/../../secret", Path::new("scripts")).is_err());
        assert!(resolve_script_path("flows\\..\\x", Path::new("scripts")).is_err());
    }

    #[test]
    fn empty_path_rejected() {
        assert_eq!(
            resolve_script_path("  ", Path::new("scripts")),
            Err(PathValidationError::Empty)
        );
    }
}
