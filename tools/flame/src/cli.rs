//! Command-line interface definitions for flame.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::emit::Profile;

/// Source-tree build orchestrator for C++ projects.
#[derive(Parser)]
#[command(name = "flame", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Build profile to use.
    #[arg(long, short = 'p', global = true, value_enum, default_value = "release")]
    pub profile: Profile,

    /// Number of parallel SCons jobs (0 or omitted = auto-detect from CPU count).
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,

    /// Show only errors and the final status line.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log every BUILD file evaluation and phase timings.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Write SConstruct and stop without invoking SCons.
    #[arg(long, global = true)]
    pub generate_scons: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Build the given targets.
    Build(TargetArgs),
    /// Build and run one binary.
    Run(RunArgs),
    /// Build and run tests.
    Test(TestArgs),
    /// Remove build outputs (and installed files under the prefix).
    Clean(InstallArgs),
    /// Build and install exported targets under a prefix.
    Install(InstallArgs),
    /// Print the resolved target graph as JSON.
    Query(TargetArgs),
}

impl Command {
    pub fn targets(&self) -> &[String] {
        match self {
            Self::Build(a) | Self::Query(a) => &a.targets,
            Self::Run(a) => std::slice::from_ref(&a.target),
            Self::Test(a) => &a.target_args.targets,
            Self::Clean(a) | Self::Install(a) => &a.target_args.targets,
        }
    }
}

/// Target patterns: `dir`, `dir:name`, `:name`, `//path:name`, `...`, `dir/...`.
#[derive(Args)]
pub struct TargetArgs {
    /// Targets to resolve (default: the current directory).
    pub targets: Vec<String>,
}

/// Arguments for the `run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Binary to run, as `:name` or `dir:name`.
    pub target: String,

    /// Arguments passed to the binary, space separated.
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,
}

/// Arguments for the `test` subcommand.
#[derive(Args)]
pub struct TestArgs {
    #[command(flatten)]
    pub target_args: TargetArgs,

    /// Arguments passed to every test binary, space separated.
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,
}

/// Arguments for `install` and `clean`.
#[derive(Args)]
pub struct InstallArgs {
    #[command(flatten)]
    pub target_args: TargetArgs,

    /// Install prefix, relative to the current directory unless absolute.
    #[arg(long, default_value = "release")]
    pub prefix: PathBuf,
}
