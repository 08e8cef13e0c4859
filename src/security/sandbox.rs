//! File system sandbox
//!
//! Confines writes and directory changes to a fixed root. Containment is
//! decided on lexically normalized absolute paths (longest common path),
//! so `..` segments cannot walk out of the root. Operations that touch the
//! disk also check the physical location, so a symlink inside the root
//! cannot lead out of it.

use std::path::{Component, Path, PathBuf};

/// Fixed root that bounds path and directory-change operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`.
    ///
    /// The root is canonicalized when it exists so that later containment
    /// checks compare like with like.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(root))
                .unwrap_or_else(|_| root.to_path_buf())
        };
        let root = absolute
            .canonicalize()
            .unwrap_or_else(|_| normalize_path(&absolute));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against `base` (absolute paths win) and normalize it
    pub fn resolve(&self, base: &Path, path: &str) -> PathBuf {
        normalize_path(&base.join(path))
    }

    /// Whether `path` is the root or one of its descendants
    pub fn contains(&self, path: &Path) -> bool {
        let normalized = normalize_path(path);
        common_path(&normalized, &self.root).as_deref() == Some(self.root.as_path())
    }

    /// Like [`contains`](Self::contains), but also requires the location
    /// on disk, after following symlinks, to be inside the root.
    ///
    /// The deepest existing ancestor is canonicalized and the missing tail
    /// re-appended. A dangling symlink counts as outside.
    pub fn contains_physical(&self, path: &Path) -> bool {
        if !self.contains(path) {
            return false;
        }
        match physical_path(&normalize_path(path)) {
            Some(physical) => self.contains(&physical),
            None => false,
        }
    }
}

/// Canonical form of `path` whose tail may not exist yet
fn physical_path(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut tail = Vec::new();
    while std::fs::symlink_metadata(existing).is_err() {
        tail.push(existing.file_name()?);
        existing = existing.parent()?;
    }

    let mut physical = existing.canonicalize().ok()?;
    for part in tail.iter().rev() {
        physical.push(part);
    }
    Some(physical)
}

/// Lexically normalize a path: drop `.`, fold `..` into the parent.
///
/// `..` at the filesystem root stays at the root, mirroring `abspath`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Longest common leading path of `a` and `b`, compared component-wise
pub fn common_path(a: &Path, b: &Path) -> Option<PathBuf> {
    let mut common = PathBuf::new();
    let mut matched = false;
    for (left, right) in a.components().zip(b.components()) {
        if left != right {
            break;
        }
        common.push(left.as_os_str());
        matched = true;
    }
    matched.then_some(common)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_folds_parent_segments() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("/../..")), PathBuf::from("/"));
        assert_eq!(normalize_path(Path::new("a/../..")), PathBuf::from(".."));
    }

    #[test]
    fn test_common_path_is_component_wise() {
        assert_eq!(
            common_path(Path::new("/srv/app/data"), Path::new("/srv/app")),
            Some(PathBuf::from("/srv/app"))
        );
        // "/srv/application" must not count as inside "/srv/app"
        assert_eq!(
            common_path(Path::new("/srv/application"), Path::new("/srv/app")),
            Some(PathBuf::from("/srv"))
        );
    }

    #[test]
    fn test_contains() {
        let temp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(temp.path());
        let root = sandbox.root().to_path_buf();

        assert!(sandbox.contains(&root));
        assert!(sandbox.contains(&root.join("nested/file.txt")));
        assert!(!sandbox.contains(&root.join("../outside.txt")));
        assert!(!sandbox.contains(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let temp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(temp.path());
        let root = sandbox.root().to_path_buf();

        assert_eq!(sandbox.resolve(&root, "a/./b.txt"), root.join("a/b.txt"));
        assert_eq!(sandbox.resolve(&root, "/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_not_contained() {
        let outside = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(temp.path());
        let root = sandbox.root().to_path_buf();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("later.txt"), root.join("dangling")).unwrap();
        std::fs::create_dir(root.join("real")).unwrap();

        assert!(sandbox.contains(&root.join("link/escaped.txt")));
        assert!(!sandbox.contains_physical(&root.join("link/escaped.txt")));
        assert!(!sandbox.contains_physical(&root.join("link")));
        assert!(!sandbox.contains_physical(&root.join("dangling")));
        assert!(sandbox.contains_physical(&root.join("real/new/file.txt")));
        assert!(sandbox.contains_physical(&root.join("fresh.txt")));
    }
}
