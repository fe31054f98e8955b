//! Command-line target patterns and the full resolution pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::closure;
use crate::config::ProjectConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::loader::ResolutionContext;
use crate::model::{Target, TargetId};
use crate::paths::{DEFINITION_FILE, ProjectPaths, normalize};
use crate::registry::TargetRegistry;
use crate::sort;
use crate::verbose::{Phase, Timer, vprintln};

/// What a command-line argument asks to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPattern {
    /// Every target declared in one directory.
    Directory(PathBuf),
    /// One named target.
    Target { dir: PathBuf, name: String },
    /// Every `BUILD` file at or below a directory (`...`, `dir/...`).
    Recursive(PathBuf),
}

impl TargetPattern {
    /// Parse a pattern given relative to `cwd`, or to the root when it starts with `//`.
    pub fn parse(pattern: &str, cwd: &Path, paths: &ProjectPaths) -> ResolveResult<Self> {
        let invalid = || ResolveError::InvalidPattern {
            pattern: pattern.to_string(),
        };

        let (base, rest) = match pattern.strip_prefix("//") {
            Some(rest) => (paths.root(), rest),
            None => (cwd, pattern),
        };

        let (dir, name) = match rest.split_once(':') {
            Some((dir, name)) => (dir, Some(name)),
            None => (rest, None),
        };

        if let Some(name) = name {
            if name.is_empty() || name.contains(['/', ':']) {
                return Err(invalid());
            }
            return Ok(Self::Target {
                dir: normalize(&base.join(dir)),
                name: name.to_string(),
            });
        }

        if dir == "..." {
            return Ok(Self::Recursive(normalize(base)));
        }
        if let Some(prefix) = dir.strip_suffix("/...") {
            return Ok(Self::Recursive(normalize(&base.join(prefix))));
        }
        if dir.contains("...") {
            return Err(invalid());
        }
        Ok(Self::Directory(normalize(&base.join(dir))))
    }
}

/// A fully resolved target graph, ready for emission.
#[derive(Debug)]
pub struct ResolvedGraph {
    /// Every registered target, leaves first.
    pub order: Vec<TargetId>,
    /// Targets the patterns named directly, in pattern order.
    pub requested: Vec<TargetId>,
    pub registry: TargetRegistry,
}

impl ResolvedGraph {
    /// Targets in leaves-first order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.order.iter().filter_map(|id| self.registry.get(id))
    }

    pub fn requested_targets(&self) -> impl Iterator<Item = &Target> {
        self.requested.iter().filter_map(|id| self.registry.get(id))
    }
}

/// Load everything the patterns name, sort it and aggregate closures.
///
/// `cc_test` targets are part of the graph only when `with_tests` is set.
pub fn resolve(
    paths: &ProjectPaths,
    config: &ProjectConfig,
    patterns: &[TargetPattern],
    with_tests: bool,
) -> ResolveResult<ResolvedGraph> {
    let mut ctx = ResolutionContext::new(paths, config).with_tests(with_tests);
    let mut requested = Vec::new();

    {
        let _t = Timer::start(Phase::Loading);
        for pattern in patterns {
            load_pattern(&mut ctx, config, pattern, &mut requested)?;
        }
    }
    vprintln!(
        "  {} targets from {} BUILD files",
        ctx.registry().len(),
        ctx.evaluations()
    );

    let mut registry = ctx.into_registry();
    let order = {
        let _t = Timer::start(Phase::Sorting);
        sort::topological_order(&registry, paths)?
    };
    {
        let _t = Timer::start(Phase::ClosureAggregation);
        closure::aggregate(&mut registry, &order)?;
    }

    let mut seen = HashSet::new();
    requested.retain(|id| seen.insert(id.clone()));
    Ok(ResolvedGraph {
        order,
        requested,
        registry,
    })
}

fn load_pattern(
    ctx: &mut ResolutionContext<'_>,
    config: &ProjectConfig,
    pattern: &TargetPattern,
    requested: &mut Vec<TargetId>,
) -> ResolveResult<()> {
    match pattern {
        TargetPattern::Target { dir, name } => {
            ensure_dir(dir)?;
            ctx.load(dir, Some(name.as_str()))?;
            let id = TargetId::new(dir, name.as_str());
            if !ctx.registry().contains(&id) {
                return Err(ResolveError::TargetNotFound {
                    name: name.clone(),
                    dir: format!("//{}", ctx.paths().dir_label(dir)),
                });
            }
            requested.push(id);
        }
        TargetPattern::Directory(dir) => {
            ensure_dir(dir)?;
            ctx.load(dir, None)?;
            requested.extend(ctx.declared(dir));
        }
        TargetPattern::Recursive(dir) => {
            ensure_dir(dir)?;
            for dir in definition_dirs(dir, ctx.paths(), config) {
                ctx.load(&dir, None)?;
                requested.extend(ctx.declared(&dir));
            }
        }
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> ResolveResult<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(ResolveError::DirectoryNotFound {
            path: dir.to_path_buf(),
        })
    }
}

/// Directories at or below `dir` containing a `BUILD` file, sorted.
///
/// Hidden directories and build output directories are skipped.
fn definition_dirs(dir: &Path, paths: &ProjectPaths, config: &ProjectConfig) -> Vec<PathBuf> {
    let build_prefix = format!("{}-", config.build.dir);
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(name.starts_with('.')
                || name == config.build.dir
                || name.starts_with(&build_prefix)
                || e.path() == paths.build_root())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path().join(DEFINITION_FILE).is_file())
        .map(|e| normalize(e.path()))
        .collect()
}
