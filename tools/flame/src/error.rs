//! Fatal conditions of a resolution pass.
//!
//! Every variant aborts the whole pass; there is no recoverable channel. The
//! messages name the offending target labels (`//dir:name`) so the user can
//! find the declaration without a backtrace.

use std::path::PathBuf;

use thiserror::Error;

pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not find FLAME_ROOT in {} or any parent directory", .start.display())]
    RootNotFound { start: PathBuf },

    #[error("invalid configuration in {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("the format of deps entry `{spec}` in {target} is invalid: {reason}")]
    MalformedDependency {
        spec: String,
        target: String,
        reason: &'static str,
    },

    #[error("BUILD file not found in {dir}{context}")]
    MissingDefinitionFile { dir: String, context: String },

    #[error("failed to evaluate {}: {message}", .file.display())]
    Script { file: PathBuf, message: String },

    #[error("{dependency} not found, required by {requester} (deps entry `{spec}`)")]
    MissingDependency {
        dependency: String,
        spec: String,
        requester: String,
    },

    #[error("library dependency has a cycle: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("{requester} depends on {dependency}, which is a {kind} and cannot be linked")]
    NotLinkable {
        requester: String,
        dependency: String,
        kind: &'static str,
    },

    #[error("target `{name}` is not declared in {dir}")]
    TargetNotFound { name: String, dir: String },

    #[error("directory does not exist: {}", .path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("target pattern `{pattern}` is invalid")]
    InvalidPattern { pattern: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(spec: &str, target: &str, reason: &'static str) -> Self {
        Self::MalformedDependency {
            spec: spec.into(),
            target: target.into(),
            reason,
        }
    }
}
