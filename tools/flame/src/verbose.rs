//! Console output levels for flame.
//!
//! - **Quiet** (`-q`): errors and the final status line only
//! - **Default**: phase headers ("Loading BUILD files...") and summaries
//! - **Verbose** (`-v`): every definition-file evaluation, selective load,
//!   unmatched source glob, and phase timings
//!
//! Status lines go to stdout, except for commands whose stdout is data
//! (`query`), which route them to stderr.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

/// Output verbosity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Default = 1,
    Verbose = 2,
}

impl Verbosity {
    /// `-q` wins over `-v`.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Default
        }
    }
}

static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Default as u8);
static STATUS_TO_STDERR: AtomicBool = AtomicBool::new(false);

/// Set the verbosity level and status stream for the rest of the process.
pub fn init(level: Verbosity, status_to_stderr: bool) {
    VERBOSITY.store(level as u8, Ordering::Relaxed);
    STATUS_TO_STDERR.store(status_to_stderr, Ordering::Relaxed);
}

pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        2 => Verbosity::Verbose,
        _ => Verbosity::Default,
    }
}

pub fn is_verbose() -> bool {
    verbosity() == Verbosity::Verbose
}

pub fn is_quiet() -> bool {
    verbosity() == Verbosity::Quiet
}

/// Write one status line to the configured stream. Write errors (a closed
/// pipe) are ignored.
pub fn status(args: fmt::Arguments<'_>) {
    if STATUS_TO_STDERR.load(Ordering::Relaxed) {
        let _ = writeln!(std::io::stderr().lock(), "{args}");
    } else {
        let _ = writeln!(std::io::stdout().lock(), "{args}");
    }
}

/// Print only in verbose mode. Mirrors `println!`.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            $crate::verbose::status(format_args!($($arg)*));
        }
    };
}

pub(crate) use vprintln;

/// Print unless quiet mode is active. Mirrors `println!`.
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            $crate::verbose::status(format_args!($($arg)*));
        }
    };
}

pub(crate) use dprintln;

/// Timed stages of one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Everything from the first `BUILD` file to the finished graph.
    Resolution,
    Loading,
    Sorting,
    ClosureAggregation,
    Emission,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::Loading => "loading BUILD files",
            Self::Sorting => "sorting",
            Self::ClosureAggregation => "closure aggregation",
            Self::Emission => "writing SConstruct",
        }
    }
}

/// RAII timer that reports how long a phase took, in verbose mode.
///
/// ```ignore
/// let _t = Timer::start(Phase::Sorting);
/// ```
pub struct Timer {
    phase: Phase,
    start: Instant,
}

impl Timer {
    pub fn start(phase: Phase) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        vprintln!("  {}: {:.1?}", self.phase.as_str(), self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Default);
        assert!(Verbosity::Quiet < Verbosity::Default);
    }

    #[test]
    fn phase_labels() {
        assert_eq!(Phase::Loading.as_str(), "loading BUILD files");
        assert_eq!(Phase::Emission.as_str(), "writing SConstruct");
    }
}
