//! SCons invocation and execution of built binaries and tests.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

use crate::graph::ResolvedGraph;
use crate::model::{Target, TargetKind};
use crate::verbose::{dprintln, vprintln};

/// Worker count for SCons when `-j` is not given: twice the CPU count on
/// small machines, capped at 8.
pub fn select_jobs(requested: Option<usize>) -> usize {
    match requested {
        Some(n) if n > 0 => n,
        _ => {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            jobs_for_cpus(cpus)
        }
    }
}

fn jobs_for_cpus(cpus: usize) -> usize {
    if cpus <= 4 {
        cpus * 2
    } else {
        cpus.min(8)
    }
}

/// Run `scons` in the project root, optionally building an alias such as
/// `install` and optionally cleaning (`-c`) instead of building.
pub fn run_scons(root: &Path, jobs: usize, alias: Option<&str>, clean: bool) -> Result<()> {
    let mut cmd = Command::new("scons");
    cmd.current_dir(root);
    if let Some(alias) = alias {
        cmd.arg(alias);
    }
    if clean {
        cmd.arg("-c");
    }
    if jobs > 1 {
        cmd.arg(format!("-j{jobs}"));
    }

    vprintln!("  running {:?}", cmd);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run scons in {}", root.display()))?;
    if !status.success() {
        bail!("scons failed ({status})");
    }
    Ok(())
}

/// Split a `--args` string into arguments.
pub fn split_args(args: Option<&str>) -> Vec<String> {
    args.map(|a| a.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Run one binary from its output directory.
pub fn run_binary(target: &Target, args: &[String]) -> Result<()> {
    let Some(exe) = target.executable() else {
        bail!("{} is a {}, not a binary", target.label, target.kind.as_str());
    };
    let dir = exe.parent().unwrap_or(Path::new("."));

    dprintln!("Running {}...", target.label);
    let status = Command::new(exe)
        .args(args)
        .current_dir(dir)
        .status()
        .with_context(|| format!("failed to run {}", exe.display()))?;
    if !status.success() {
        bail!("{} failed ({status})", target.label);
    }
    Ok(())
}

/// Outcome of running the requested test binaries.
#[derive(Debug, Default)]
pub struct TestSummary {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

/// Stage test data and run every requested `cc_test` in its run directory.
pub fn run_tests(graph: &ResolvedGraph, args: &[String]) -> Result<TestSummary> {
    let mut summary = TestSummary::default();

    for test in graph
        .requested_targets()
        .filter(|t| t.kind == TargetKind::Test)
    {
        let Some(run_dir) = &test.run_dir else {
            continue;
        };
        stage_testdata(test, run_dir)?;

        dprintln!("Running {}...", test.label);
        let status = Command::new(&test.output)
            .args(args)
            .current_dir(run_dir)
            .status()
            .with_context(|| format!("failed to run {}", test.output.display()))?;
        if status.success() {
            summary.passed.push(test.label.clone());
        } else {
            summary.failed.push(test.label.clone());
        }
    }

    Ok(summary)
}

/// Link each test-data file into the test's run directory.
pub fn stage_testdata(test: &Target, run_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(run_dir)
        .with_context(|| format!("creating {}", run_dir.display()))?;

    for pair in &test.testdata {
        if let Some(parent) = pair.dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        if pair.dest.symlink_metadata().is_ok() {
            std::fs::remove_file(&pair.dest)
                .with_context(|| format!("removing stale {}", pair.dest.display()))?;
        }
        symlink(&pair.source, &pair.dest).with_context(|| {
            format!(
                "linking {} -> {}",
                pair.dest.display(),
                pair.source.display()
            )
        })?;
    }
    Ok(())
}

/// Point `link` at `target`, replacing whatever `link` was.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Ok(meta) = link.symlink_metadata() {
        if meta.is_dir() {
            bail!(
                "{} is a directory; remove it so it can link to {}",
                link.display(),
                target.display()
            );
        }
        std::fs::remove_file(link).with_context(|| format!("removing {}", link.display()))?;
    }
    symlink(target, link)
        .with_context(|| format!("linking {} -> {}", link.display(), target.display()))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::fs::copy(target, link).map(|_| ())
}
