//! Parsing of `deps` entries.
//!
//! ```text
//! #pthread           system library, no graph edge
//! :base              target `base` in the declaring directory
//! //common/log:log   target `log` in <root>/common/log
//! ```

use std::path::Path;

use crate::error::{ResolveError, ResolveResult};
use crate::model::TargetId;
use crate::paths::ProjectPaths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyReference {
    SystemLibrary(String),
    SiblingTarget(String),
    /// `path` is root-relative and normalized (no trailing slash).
    QualifiedTarget { path: String, name: String },
}

impl DependencyReference {
    /// Parse one `deps` entry declared by `owner` (a label, for messages).
    pub fn parse(spec: &str, owner: &str) -> ResolveResult<Self> {
        if let Some(lib) = spec.strip_prefix('#') {
            if lib.is_empty() {
                return Err(ResolveError::malformed(spec, owner, "empty system library name"));
            }
            return Ok(Self::SystemLibrary(lib.into()));
        }

        if let Some(rest) = spec.strip_prefix("//") {
            let mut fields = rest.split(':');
            let (Some(path), Some(name), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(ResolveError::malformed(
                    spec,
                    owner,
                    "expected exactly one `:` after the path",
                ));
            };
            check_name(spec, owner, name)?;
            let Some(path) = normalize_path(path) else {
                return Err(ResolveError::malformed(
                    spec,
                    owner,
                    "path must stay inside the project root (no `..`)",
                ));
            };
            return Ok(Self::QualifiedTarget {
                path,
                name: name.into(),
            });
        }

        if let Some(name) = spec.strip_prefix(':') {
            check_name(spec, owner, name)?;
            return Ok(Self::SiblingTarget(name.into()));
        }

        Err(ResolveError::malformed(
            spec,
            owner,
            "expected `#lib`, `:name` or `//path:name`",
        ))
    }

    /// The graph edge this reference creates, if any.
    ///
    /// `dir` is the absolute directory of the declaring target. The returned
    /// id's `dir` is the directory whose `BUILD` file must be loaded to
    /// satisfy the edge.
    pub fn edge(&self, dir: &Path, paths: &ProjectPaths) -> Option<TargetId> {
        match self {
            Self::SystemLibrary(_) => None,
            Self::SiblingTarget(name) => Some(TargetId::new(dir, name.as_str())),
            Self::QualifiedTarget { path, name } => {
                Some(TargetId::new(paths.from_root(path), name.as_str()))
            }
        }
    }
}

fn check_name(spec: &str, owner: &str, name: &str) -> ResolveResult<()> {
    if name.is_empty() {
        return Err(ResolveError::malformed(spec, owner, "empty target name"));
    }
    if name.contains(['/', ':']) {
        return Err(ResolveError::malformed(spec, owner, "target name contains `/` or `:`"));
    }
    Ok(())
}

/// Strip trailing and doubled slashes and `.` segments from a root-relative
/// path. `None` if the path has a `..` segment.
fn normalize_path(path: &str) -> Option<String> {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();
    if segments.contains(&"..") {
        return None;
    }
    Some(segments.join("/"))
}
