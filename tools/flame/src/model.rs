//! Target declarations and registry records.
//!
//! [`TargetDecl`] is what evaluating a `BUILD` file produces: plain data with
//! no Rhai types, in declaration order. [`Target`] is the registry record a
//! declaration is materialized into. Its [`ResolvedAttrs`] stay empty until
//! closure aggregation fills them in.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Export-mode suffix of a [`TargetId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Variant {
    /// The in-tree artifact: static archive, program, test or export manifest.
    Primary,
    /// Shared-library variant of a library exported as `dynamic` or `both`.
    Shared,
}

/// Registry key: owning directory, target name, variant.
///
/// The derived ordering (directory, then name, then variant) is the
/// tie-breaker for every ordering decision the resolver makes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetId {
    pub dir: PathBuf,
    pub name: String,
    pub variant: Variant,
}

impl TargetId {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            variant: Variant::Primary,
        }
    }

    pub fn shared(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            variant: Variant::Shared,
            ..Self::new(dir, name)
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dir.display(), self.name)?;
        if self.variant == Variant::Shared {
            f.write_str("#shared")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetKind {
    Library,
    Binary,
    Test,
    ProtoLibrary,
    PrebuiltLibrary,
    ExtraExport,
}

impl TargetKind {
    /// Entry-point name used in `BUILD` files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Library => "cc_library",
            Self::Binary => "cc_binary",
            Self::Test => "cc_test",
            Self::ProtoLibrary => "proto_library",
            Self::PrebuiltLibrary => "prebuilt cc_library",
            Self::ExtraExport => "extra_export",
        }
    }

    /// Whether other targets may list this kind in `deps`.
    pub fn is_linkable(&self) -> bool {
        matches!(
            self,
            Self::Library | Self::ProtoLibrary | Self::PrebuiltLibrary
        )
    }

    /// Binaries and tests are the only link roots; force-link applies to them.
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Binary | Self::Test)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ExportMode {
    /// Internal static archive only.
    #[default]
    None,
    Static,
    Dynamic,
    Both,
}

impl ExportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "static" => Some(Self::Static),
            "dynamic" => Some(Self::Dynamic),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    /// Whether a shared-library variant is registered.
    pub fn has_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic | Self::Both)
    }

    /// Whether the static archive is installed.
    pub fn exports_static(&self) -> bool {
        matches!(self, Self::Static | Self::Both)
    }
}

/// A test-data entry: `src` is relative to the declaring directory, `dest`
/// relative to the test's run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestData {
    pub src: String,
    pub dest: String,
}

/// One declaration call from a `BUILD` file.
#[derive(Debug, Clone, Serialize)]
pub struct TargetDecl {
    /// Declared kind. `prebuilt(true)` on a library is recorded in
    /// [`TargetDecl::prebuilt`]; the kind stays `Library`.
    pub kind: TargetKind,
    pub name: String,
    pub srcs: Vec<String>,
    pub deps: Vec<String>,
    pub includes: Vec<String>,
    pub defines: Vec<String>,
    pub extra_include_paths: Vec<String>,
    pub extra_lib_paths: Vec<String>,
    pub export_mode: ExportMode,
    pub link_all_symbols: bool,
    pub allow_export: bool,
    pub prebuilt: bool,
    pub testdata: Vec<TestData>,
    pub headers: Vec<String>,
    pub configs: Vec<String>,
    pub data: Vec<String>,
}

impl TargetDecl {
    pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            srcs: Vec::new(),
            deps: Vec::new(),
            includes: Vec::new(),
            defines: Vec::new(),
            extra_include_paths: Vec::new(),
            extra_lib_paths: Vec::new(),
            export_mode: ExportMode::None,
            link_all_symbols: false,
            allow_export: false,
            prebuilt: false,
            testdata: Vec::new(),
            headers: Vec::new(),
            configs: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Kind of the registry record this declaration becomes.
    pub fn target_kind(&self) -> TargetKind {
        if self.kind == TargetKind::Library && self.prebuilt {
            TargetKind::PrebuiltLibrary
        } else {
            self.kind
        }
    }
}

/// The evaluated contents of one `BUILD` file.
#[derive(Debug, Clone, Default)]
pub struct DefinitionFile {
    pub path: PathBuf,
    pub decls: Vec<TargetDecl>,
}

/// A direct dependency edge together with the `deps` string it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectDep {
    pub spec: String,
    pub id: TargetId,
}

/// Source and destination of a test-data symlink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyPair {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// A file installed under `<prefix>/<dest_dir>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallMapping {
    pub source: PathBuf,
    pub dest_dir: String,
}

/// Attributes computed by closure aggregation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedAttrs {
    /// Source-built libraries in link order (dependents before dependencies).
    pub libraries: Vec<TargetId>,
    /// Libraries linked with `--whole-archive` (binaries and tests only).
    pub force_link: Vec<TargetId>,
    /// Explicit rebuild edges, one per force-linked library.
    pub build_deps: Vec<TargetId>,
    pub prebuilt_static: Vec<TargetId>,
    pub prebuilt_dynamic: Vec<TargetId>,
    pub system_libraries: Vec<String>,
    pub headers: Vec<PathBuf>,
    pub lib_paths: Vec<PathBuf>,
}

/// A registered target.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    /// `//dir:name` label for diagnostics.
    pub label: String,
    /// Absolute sources after glob expansion.
    pub srcs: Vec<PathBuf>,
    /// Include directories exported to dependents.
    pub includes: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub extra_include_paths: Vec<PathBuf>,
    pub extra_lib_paths: Vec<PathBuf>,
    pub export_mode: ExportMode,
    pub link_all_symbols: bool,
    pub allow_export: bool,
    /// Artifact path: archive, shared object, program or prebuilt file.
    pub output: PathBuf,
    /// Working directory test binaries run in.
    pub run_dir: Option<PathBuf>,
    pub testdata: Vec<CopyPair>,
    pub install: Vec<InstallMapping>,
    pub deps: Vec<DirectDep>,
    /// `#name` entries of this target's own `deps`.
    pub system_libraries: Vec<String>,
    pub resolved: ResolvedAttrs,
}

impl Target {
    pub fn dir(&self) -> &Path {
        &self.id.dir
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Executable path for binaries and tests.
    pub fn executable(&self) -> Option<&Path> {
        self.kind.is_executable().then_some(self.output.as_path())
    }
}

#[cfg(test)]
impl Target {
    /// A target under `/p/<dir>` whose deps are `(dir, name)` pairs under `/p`.
    pub(crate) fn stub(kind: TargetKind, dir: &str, name: &str, deps: &[(&str, &str)]) -> Self {
        let paths = crate::paths::ProjectPaths::new(PathBuf::from("/p"), "flame-bin");
        let dir = paths.from_root(dir);
        Self {
            id: TargetId::new(&dir, name),
            kind,
            label: paths.label(&dir, name),
            srcs: Vec::new(),
            includes: Vec::new(),
            defines: Vec::new(),
            extra_include_paths: Vec::new(),
            extra_lib_paths: Vec::new(),
            export_mode: ExportMode::None,
            link_all_symbols: false,
            allow_export: false,
            output: paths.output_dir(&dir).join(format!("lib{name}.a")),
            run_dir: None,
            testdata: Vec::new(),
            install: Vec::new(),
            deps: deps
                .iter()
                .map(|(d, n)| DirectDep {
                    spec: format!("//{d}:{n}"),
                    id: TargetId::new(paths.from_root(d), *n),
                })
                .collect(),
            system_libraries: Vec::new(),
            resolved: ResolvedAttrs::default(),
        }
    }
}
