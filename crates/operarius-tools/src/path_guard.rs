//! Allow-list enforcement for filesystem paths.
//!
//! A path argument is made absolute against the base directory, normalized
//! lexically (`.` and `..` folded), then symlinks are resolved as far as the
//! path exists. Only the resulting path is compared with the allowed roots,
//! so `../` sequences and symlinks cannot escape them.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use operarius_core::tools::{ToolError, ToolResult};

/// Allowed-directory policy for path-scoped tools.
#[derive(Debug, Clone)]
pub struct PathGuard {
    base: PathBuf,
    roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Guard resolving relative paths against the current working directory.
    pub fn new(roots: &[PathBuf]) -> Self {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::with_base(base, roots)
    }

    /// Guard resolving relative paths against `base`.
    pub fn with_base(base: impl Into<PathBuf>, roots: &[PathBuf]) -> Self {
        let base = base.into();
        let roots = roots.iter().map(|root| resolve_full(&base, root)).collect();
        Self { base, roots }
    }

    /// Allowed roots, fully resolved.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve `raw` and check it against the allowed roots.
    pub fn resolve(&self, raw: &str) -> ToolResult<PathBuf> {
        if raw.trim().is_empty() {
            return Err(ToolError::InvalidArguments("path must not be empty".to_string()));
        }
        let resolved = resolve_full(&self.base, Path::new(raw));
        if self.is_allowed(&resolved) {
            Ok(resolved)
        } else {
            tracing::warn!(path = %raw, resolved = %resolved.display(), "Path outside allowed directories");
            Err(ToolError::PermissionDenied(format!(
                "'{raw}' is outside the allowed directories"
            )))
        }
    }

    /// Whether an already resolved path lies within an allowed root.
    pub fn is_allowed(&self, resolved: &Path) -> bool {
        self.roots.iter().any(|root| resolved.starts_with(root))
    }

    /// Create every allowed root that does not exist yet.
    pub async fn ensure_roots(&self) -> std::io::Result<()> {
        for root in &self.roots {
            tokio::fs::create_dir_all(root).await?;
        }
        Ok(())
    }
}

fn resolve_full(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let normalized = normalize_lexically(&joined);
    canonicalize_best_effort(&normalized).unwrap_or(normalized)
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix and re-append the rest.
pub fn canonicalize_best_effort(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return std::fs::canonicalize(path);
    }

    let mut missing_suffix: Vec<OsString> = Vec::new();
    let mut cursor = path;
    while !cursor.exists() {
        if let Some(file_name) = cursor.file_name() {
            missing_suffix.push(file_name.to_os_string());
        }
        cursor = match cursor.parent() {
            Some(parent) => parent,
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no existing ancestor for path",
                ));
            }
        };
    }

    let mut canonical = std::fs::canonicalize(cursor)?;
    for component in missing_suffix.iter().rev() {
        canonical.push(component);
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(base: &Path) -> PathGuard {
        PathGuard::with_base(base, &[PathBuf::from("./data")])
    }

    #[test]
    fn test_parent_traversal_denied() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("data")).unwrap();

        let err = guard(tmp.path()).resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));

        let err = guard(tmp.path()).resolve("data/../../outside.txt").unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[test]
    fn test_inside_root_allowed_even_if_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let g = guard(tmp.path());

        let resolved = g.resolve("data/new/file.txt").unwrap();
        assert!(resolved.ends_with("data/new/file.txt"));
        assert!(g.resolve("./data").is_ok());
        assert!(g.resolve("data/sub/../x").is_ok());
    }

    #[test]
    fn test_sibling_prefix_is_not_a_match() {
        let tmp = tempfile::tempdir().unwrap();
        let err = guard(tmp.path()).resolve("data2/file.txt").unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[test]
    fn test_absolute_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let g = guard(tmp.path());
        assert!(g.resolve("/etc/passwd").is_err());

        let inside = tmp.path().join("data").join("x.txt");
        assert!(g.resolve(inside.to_str().unwrap()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("data")).unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("data/link")).unwrap();

        let err = guard(tmp.path()).resolve("data/link/secret").unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            guard(tmp.path()).resolve("  "),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_lexically(Path::new("/../../etc")), PathBuf::from("/etc"));
    }
}
