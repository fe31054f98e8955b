//! Project root discovery and path identity.
//!
//! Every directory that participates in resolution is identified by its
//! lexically normalized absolute path. Labels shown to the user are the
//! root-relative form `//dir/sub:name`.

use std::path::{Component, Path, PathBuf};

use crate::error::{ResolveError, ResolveResult};

/// Marker file at the project root. Doubles as the TOML configuration file.
pub const ROOT_MARKER: &str = "FLAME_ROOT";

/// Per-directory target-definition file.
pub const DEFINITION_FILE: &str = "BUILD";

/// Backend script written at the project root.
pub const SCONSTRUCT: &str = "SConstruct";

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
    build_root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: PathBuf, build_dir: &str) -> Self {
        let root = normalize(&root);
        let build_root = root.join(build_dir);
        Self { root, build_root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output root of the active profile (`<root>/flame-bin` by default).
    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Path of `dir` relative to the project root. Directories outside the
    /// root are returned unchanged.
    pub fn relative<'a>(&self, dir: &'a Path) -> &'a Path {
        dir.strip_prefix(&self.root).unwrap_or(dir)
    }

    /// Mirror of a source directory inside the build root.
    pub fn output_dir(&self, dir: &Path) -> PathBuf {
        self.build_root.join(self.relative(dir))
    }

    pub fn definition_file(&self, dir: &Path) -> PathBuf {
        dir.join(DEFINITION_FILE)
    }

    /// Absolute directory for a root-relative path such as `common/log`.
    pub fn from_root(&self, relative: &str) -> PathBuf {
        normalize(&self.root.join(relative))
    }

    /// `//dir:name` label for diagnostics.
    pub fn label(&self, dir: &Path, name: &str) -> String {
        format!("//{}:{name}", self.dir_label(dir))
    }

    /// Root-relative directory with `/` separators (empty for the root).
    pub fn dir_label(&self, dir: &Path) -> String {
        self.relative(dir)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Find the project root by looking for [`ROOT_MARKER`] in `start` and its parents.
pub fn find_project_root(start: &Path) -> ResolveResult<PathBuf> {
    let mut dir = normalize(start);
    loop {
        if dir.join(ROOT_MARKER).is_file() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(ResolveError::RootNotFound {
                start: start.to_path_buf(),
            });
        }
    }
}

/// Lexically normalize a path: drop `.` segments and fold `..` into the parent.
///
/// Symlinks are not resolved, so identity stays stable for paths that were
/// derived from the same root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(
            normalize(Path::new("/a/./b/../c/")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn labels_are_root_relative() {
        let paths = ProjectPaths::new(PathBuf::from("/work/proj"), "flame-bin");
        assert_eq!(
            paths.label(Path::new("/work/proj/common/log"), "log"),
            "//common/log:log"
        );
        assert_eq!(paths.label(Path::new("/work/proj"), "app"), "//:app");
        assert_eq!(
            paths.output_dir(Path::new("/work/proj/common")),
            PathBuf::from("/work/proj/flame-bin/common")
        );
    }

    #[test]
    fn discover_walks_upward() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(ROOT_MARKER), "").unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested).unwrap();
        assert_eq!(root, normalize(tmp.path()));
    }

    #[test]
    fn discover_without_marker_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = find_project_root(tmp.path()).unwrap_err();
        assert!(matches!(err, ResolveError::RootNotFound { .. }));
    }
}
