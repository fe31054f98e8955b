//! Flame build orchestrator.
//!
//! Reads the `BUILD` files of a source tree, resolves the target graph they
//! describe and drives SCons with a generated, link-ordered SConstruct.
//!
//! Pipeline: find FLAME_ROOT → load BUILD files → sort → aggregate closures →
//!           write SConstruct → run SCons → run binaries or tests.

mod cli;
mod closure;
mod config;
mod deps;
mod emit;
mod engine;
mod error;
mod graph;
mod loader;
mod model;
mod paths;
mod registry;
mod run;
mod sort;
mod sources;
mod verbose;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

use config::ProjectConfig;
use emit::EmitOptions;
use graph::{ResolvedGraph, TargetPattern};
use model::TargetKind;
use paths::ProjectPaths;
use verbose::{Phase, Timer, Verbosity, dprintln};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    // `query` writes JSON to stdout.
    let status_to_stderr = matches!(cli.command, cli::Command::Query(_));
    verbose::init(
        Verbosity::from_flags(cli.quiet, cli.verbose),
        status_to_stderr,
    );

    match cli.command {
        cli::Command::Build(_) => cmd_build(&cli),
        cli::Command::Run(ref args) => cmd_run(&cli, args),
        cli::Command::Test(ref args) => cmd_test(&cli, args),
        cli::Command::Clean(ref args) => cmd_clean(&cli, args),
        cli::Command::Install(ref args) => cmd_install(&cli, args),
        cli::Command::Query(_) => cmd_query(&cli),
    }
}

// ===========================================================================
// Project setup
// ===========================================================================

/// Root, configuration and working directory of one invocation.
struct Workspace {
    cwd: PathBuf,
    paths: ProjectPaths,
    config: ProjectConfig,
}

impl Workspace {
    /// Locate FLAME_ROOT from the current directory and read its configuration.
    fn open(cli: &cli::Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to read current directory")?;
        let root = paths::find_project_root(&cwd)?;
        let config = ProjectConfig::load(&root)?;
        let build_dir = format!("{}-{}", config.build.dir, cli.profile.as_str());
        let paths = ProjectPaths::new(root, &build_dir);
        Ok(Self { cwd, paths, config })
    }

    /// Create the profile's output directory and point the plain build
    /// directory name at it.
    fn prepare_build_dir(&self) -> Result<()> {
        let build_root = self.paths.build_root();
        std::fs::create_dir_all(build_root)
            .with_context(|| format!("creating {}", build_root.display()))?;
        let link = self.paths.root().join(&self.config.build.dir);
        run::replace_symlink(build_root, &link)
    }

    /// Resolve `targets`, or the current directory if none are given.
    /// `cc_test` targets are only loaded for `with_tests`.
    fn resolve(&self, targets: &[String], with_tests: bool) -> Result<ResolvedGraph> {
        dprintln!("Loading BUILD files...");
        let _t = Timer::start(Phase::Resolution);

        let patterns = if targets.is_empty() {
            vec![TargetPattern::Directory(self.cwd.clone())]
        } else {
            targets
                .iter()
                .map(|t| TargetPattern::parse(t, &self.cwd, &self.paths))
                .collect::<Result<Vec<_>, _>>()?
        };
        let graph = graph::resolve(&self.paths, &self.config, &patterns, with_tests)?;
        dprintln!("Resolved {} targets.", graph.order.len());
        Ok(graph)
    }

    fn write_scons(&self, graph: &ResolvedGraph, opts: &EmitOptions) -> Result<()> {
        dprintln!("Writing SConstruct...");
        let _t = Timer::start(Phase::Emission);
        let path = emit::write(graph, &self.paths, &self.config, opts)?;
        verbose::vprintln!("  wrote {}", path.display());
        Ok(())
    }

    fn emit_options(&self, cli: &cli::Cli) -> EmitOptions {
        EmitOptions {
            profile: cli.profile,
            tests: false,
            install_prefix: None,
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        paths::normalize(&self.cwd.join(path))
    }
}

/// Write SConstruct and build. Returns `false` if `--generate-scons` stopped
/// before SCons ran.
fn build(cli: &cli::Cli, ws: &Workspace, graph: &ResolvedGraph, opts: &EmitOptions) -> Result<bool> {
    ws.prepare_build_dir()?;
    ws.write_scons(graph, opts)?;
    if cli.generate_scons {
        println!("SConstruct written to {}.", ws.paths.root().display());
        return Ok(false);
    }
    let jobs = run::select_jobs(cli.jobs);
    dprintln!("Building with {jobs} jobs...");
    run::run_scons(ws.paths.root(), jobs, None, false)?;
    Ok(true)
}

// ===========================================================================
// Commands
// ===========================================================================

fn cmd_build(cli: &cli::Cli) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let graph = ws.resolve(cli.command.targets(), false)?;
    if build(cli, &ws, &graph, &ws.emit_options(cli))? {
        println!("Build success!");
    }
    Ok(())
}

fn cmd_run(cli: &cli::Cli, args: &cli::RunArgs) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let pattern = TargetPattern::parse(&args.target, &ws.cwd, &ws.paths)?;
    if !matches!(pattern, TargetPattern::Target { .. }) {
        bail!("`run` takes one binary as `:name` or `dir:name`, got `{}`", args.target);
    }

    let graph = ws.resolve(std::slice::from_ref(&args.target), false)?;
    let Some(target) = graph.requested_targets().next() else {
        bail!("`{}` did not resolve to a target", args.target);
    };
    if target.kind != TargetKind::Binary {
        bail!("{} is a {}, not a cc_binary", target.label, target.kind.as_str());
    }

    if build(cli, &ws, &graph, &ws.emit_options(cli))? {
        run::run_binary(target, &run::split_args(args.args.as_deref()))?;
    }
    Ok(())
}

fn cmd_test(cli: &cli::Cli, args: &cli::TestArgs) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let graph = ws.resolve(&args.target_args.targets, true)?;
    let opts = EmitOptions {
        tests: true,
        ..ws.emit_options(cli)
    };
    if !build(cli, &ws, &graph, &opts)? {
        return Ok(());
    }

    let summary = run::run_tests(&graph, &run::split_args(args.args.as_deref()))?;
    if summary.failed.is_empty() {
        println!("All {} test(s) passed!", summary.passed.len());
        return Ok(());
    }
    dprintln!("{} test(s) passed.", summary.passed.len());
    for label in &summary.failed {
        eprintln!("FAILED: {label}");
    }
    bail!("{} test(s) failed", summary.failed.len());
}

fn cmd_clean(cli: &cli::Cli, args: &cli::InstallArgs) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let graph = ws.resolve(&args.target_args.targets, false)?;
    let opts = EmitOptions {
        install_prefix: Some(ws.absolute(&args.prefix)),
        ..ws.emit_options(cli)
    };

    ws.write_scons(&graph, &opts)?;
    if cli.generate_scons {
        return Ok(());
    }
    let alias = emit::has_install_rules(&graph, &opts).then_some("install");
    run::run_scons(ws.paths.root(), run::select_jobs(cli.jobs), alias, true)?;
    println!("Clean success!");
    Ok(())
}

fn cmd_install(cli: &cli::Cli, args: &cli::InstallArgs) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let graph = ws.resolve(&args.target_args.targets, false)?;
    let prefix = ws.absolute(&args.prefix);
    let opts = EmitOptions {
        install_prefix: Some(prefix.clone()),
        ..ws.emit_options(cli)
    };
    if !build(cli, &ws, &graph, &opts)? {
        return Ok(());
    }

    if emit::has_install_rules(&graph, &opts) {
        dprintln!("Installing into {}...", prefix.display());
        run::run_scons(ws.paths.root(), run::select_jobs(cli.jobs), Some("install"), false)?;
        println!("Install success!");
    } else {
        println!("Nothing to install.");
    }
    Ok(())
}

fn cmd_query(cli: &cli::Cli) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let graph = ws.resolve(cli.command.targets(), false)?;
    let targets: Vec<_> = graph.targets().collect();
    let json = serde_json::to_string_pretty(&targets).context("failed to serialize graph")?;
    println!("{json}");
    Ok(())
}
