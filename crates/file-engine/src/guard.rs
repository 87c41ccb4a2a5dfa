//! Path normalization and allow-list enforcement.
//!
//! Every path entering the engine passes through [`PathGuard::resolve`],
//! which lexically cleans the input and accepts it only when it is equal to
//! or a descendant of one of the configured allowed roots. With no roots
//! configured the guard runs in open mode and accepts everything.

use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// Allow-list gate for every path the engine touches.
#[derive(Debug)]
pub struct PathGuard {
    /// Normalized allowed roots. Empty means open mode.
    roots: Vec<PathBuf>,
    /// Case-folded copies of `roots`, used for comparison on
    /// case-insensitive filesystems.
    folded_roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Creates a guard from the configured allowed base directories.
    pub fn new(allowed_roots: &[PathBuf]) -> Self {
        let roots: Vec<PathBuf> = allowed_roots
            .iter()
            .map(|root| normalize(&absolutize(root)))
            .collect();
        let folded_roots = roots.iter().map(|root| fold_case(root)).collect();

        if roots.is_empty() {
            log::warn!("path guard running in OPEN mode: all paths are accepted");
        } else {
            log::info!(
                "path guard restricted to {} root(s): {}",
                roots.len(),
                roots
                    .iter()
                    .map(|r| r.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Self {
            roots,
            folded_roots,
        }
    }

    /// Returns the configured allowed roots after normalization.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolves a requested path to an absolute, lexically cleaned form and
    /// checks it against the allow-list.
    ///
    /// `..` segments are removed lexically before the check, so traversal
    /// sequences cannot escape a root. Comparison is case-folded on
    /// platforms with case-insensitive filesystems.
    pub fn resolve(&self, raw: &Path) -> Result<PathBuf> {
        let cleaned = normalize(&absolutize(raw));

        if self.roots.is_empty() {
            return Ok(cleaned);
        }

        let folded = fold_case(&cleaned);
        for root in &self.folded_roots {
            if folded == *root {
                return Ok(cleaned);
            }
            // strip_prefix is separator-bounded: /data-x is not under /data.
            if let Ok(rest) = folded.strip_prefix(root) {
                if !rest.as_os_str().is_empty()
                    && !rest.components().next().map_or(false, |c| {
                        matches!(c, Component::ParentDir)
                    })
                {
                    return Ok(cleaned);
                }
            }
        }

        Err(EngineError::AccessDenied(cleaned))
    }
}

/// Makes a path absolute by joining relative inputs onto the current
/// working directory. No filesystem resolution happens here.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Lexically cleans a path: removes `.` segments and resolves `..` against
/// the preceding component without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op: /../x stays /x.
                if !matches!(
                    cleaned.components().last(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    cleaned.pop();
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn fold_case(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn fold_case(path: &Path) -> PathBuf {
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(roots: &[&str]) -> PathGuard {
        let roots: Vec<PathBuf> = roots.iter().map(PathBuf::from).collect();
        PathGuard::new(&roots)
    }

    #[test]
    fn accepts_paths_under_allowed_root() {
        let guard = guard(&["/data"]);
        assert!(guard.resolve(Path::new("/data/a.txt")).is_ok());
        assert!(guard.resolve(Path::new("/data/sub/deep/b.txt")).is_ok());
    }

    #[test]
    fn accepts_root_itself() {
        let guard = guard(&["/data"]);
        assert_eq!(
            guard.resolve(Path::new("/data")).unwrap(),
            PathBuf::from("/data")
        );
    }

    #[test]
    fn rejects_paths_outside_roots() {
        let guard = guard(&["/data"]);
        assert!(matches!(
            guard.resolve(Path::new("/etc/passwd")),
            Err(EngineError::AccessDenied(_))
        ));
    }

    #[test]
    fn rejects_traversal_with_dotdot() {
        let guard = guard(&["/data"]);
        assert!(matches!(
            guard.resolve(Path::new("/data/../etc/passwd")),
            Err(EngineError::AccessDenied(_))
        ));
        assert!(matches!(
            guard.resolve(Path::new("/data/sub/../../etc/passwd")),
            Err(EngineError::AccessDenied(_))
        ));
    }

    #[test]
    fn dotdot_within_root_is_fine() {
        let guard = guard(&["/data"]);
        assert_eq!(
            guard.resolve(Path::new("/data/sub/../a.txt")).unwrap(),
            PathBuf::from("/data/a.txt")
        );
    }

    #[test]
    fn sibling_with_shared_prefix_is_rejected() {
        let guard = guard(&["/data"]);
        assert!(guard.resolve(Path::new("/data-evil/a.txt")).is_err());
    }

    #[test]
    fn open_mode_accepts_everything() {
        let guard = guard(&[]);
        assert!(guard.resolve(Path::new("/etc/passwd")).is_ok());
        assert!(guard.resolve(Path::new("/anything/at/all")).is_ok());
    }

    #[test]
    fn multiple_roots() {
        let guard = guard(&["/data", "/srv/shared"]);
        assert!(guard.resolve(Path::new("/srv/shared/x")).is_ok());
        assert!(guard.resolve(Path::new("/srv/other/x")).is_err());
    }

    #[cfg(any(target_os = "macos", target_os = "windows"))]
    #[test]
    fn comparison_is_case_folded() {
        let guard = guard(&["/data"]);
        assert!(guard.resolve(Path::new("/DATA/a.txt")).is_ok());
    }

    #[test]
    fn normalize_collapses_dot_segments() {
        assert_eq!(
            normalize(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
    }
}
