//! SConstruct generation.
//!
//! The resolved graph is written out in leaves-first order, one cloned
//! environment and one builder call per target. Library link order comes
//! straight from closure aggregation; nothing here reorders it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::ProjectConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::graph::ResolvedGraph;
use crate::model::{Target, TargetId, TargetKind, Variant};
use crate::paths::{ProjectPaths, SCONSTRUCT};

/// Build profile, selecting compiler flags and the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Profile {
    Debug,
    Release,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    pub fn cpp_flags(&self) -> &'static [&'static str] {
        match self {
            Self::Debug => &["-g", "-DDEBUG"],
            Self::Release => &["-DNDEBUG", "-O2"],
        }
    }
}

/// What to put in the script beyond libraries and binaries.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub profile: Profile,
    /// Emit `cc_test` targets.
    pub tests: bool,
    /// Emit install rules under this prefix.
    pub install_prefix: Option<PathBuf>,
}

/// Write `<root>/SConstruct` and return its path.
pub fn write(
    graph: &ResolvedGraph,
    paths: &ProjectPaths,
    config: &ProjectConfig,
    opts: &EmitOptions,
) -> ResolveResult<PathBuf> {
    let path = paths.root().join(SCONSTRUCT);
    let script = render(graph, paths, config, opts);
    std::fs::write(&path, script).map_err(|e| ResolveError::io(&path, e))?;
    Ok(path)
}

/// Render the SConstruct text for `graph`.
pub fn render(
    graph: &ResolvedGraph,
    paths: &ProjectPaths,
    config: &ProjectConfig,
    opts: &EmitOptions,
) -> String {
    let mut emitter = Emitter {
        out: String::new(),
        paths,
        names: HashMap::new(),
        taken: HashSet::new(),
        installs: Vec::new(),
    };
    emitter.header(config, opts.profile);

    for target in graph.targets() {
        if target.kind == TargetKind::Test && !opts.tests {
            continue;
        }
        emitter.target(graph, target);
        if let Some(prefix) = &opts.install_prefix {
            emitter.install(target, prefix);
        }
    }

    if !emitter.installs.is_empty() {
        let installs = std::mem::take(&mut emitter.installs);
        emitter.line(format!("env.Alias(\"install\", [{}])", installs.join(", ")));
    }
    emitter.out
}

/// Whether `render` with these options produces an `install` alias.
pub fn has_install_rules(graph: &ResolvedGraph, opts: &EmitOptions) -> bool {
    opts.install_prefix.is_some() && graph.targets().any(installs_something)
}

fn installs_something(target: &Target) -> bool {
    match target.kind {
        TargetKind::Library => {
            target.id.variant == Variant::Shared
                || target.allow_export
                || target.export_mode.exports_static()
        }
        TargetKind::Binary => true,
        TargetKind::ExtraExport => !target.install.is_empty(),
        _ => false,
    }
}

struct Emitter<'a> {
    out: String,
    paths: &'a ProjectPaths,
    /// Python variable holding each emitted target's nodes.
    names: HashMap<TargetId, String>,
    taken: HashSet<String>,
    installs: Vec<String>,
}

impl Emitter<'_> {
    fn line(&mut self, line: impl AsRef<str>) {
        self.out.push_str(line.as_ref());
        self.out.push('\n');
    }

    fn header(&mut self, config: &ProjectConfig, profile: Profile) {
        let root = self.paths.root();
        let build_root = self.paths.build_root();
        self.line(format!(
            "# Generated by flame ({} profile). Do not edit.",
            profile.as_str()
        ));
        self.line("import SCons");
        self.line("");
        self.line(format!(
            "env = Environment(CPPPATH={})",
            list([path(root), path(build_root)])
        ));
        self.line(format!(
            "env.Append(CPPFLAGS={})",
            list(profile.cpp_flags().iter().map(|f| quote(f)))
        ));
        self.line("");

        let protoc = format!(
            "{} --proto_path=. -I. -I{} --cpp_out={} $SOURCE",
            root.join(&config.proto.protoc).display(),
            config.proto.include,
            build_root.display(),
        );
        self.line(format!(
            "proto_builder = Builder(action=SCons.Action.Action({}))",
            quote(&protoc)
        ));
        self.line("env.Append(BUILDERS={\"Proto\": proto_builder})");
    }

    /// Unique Python identifier for `id`.
    fn name_for(&mut self, target: &Target) -> String {
        if let Some(name) = self.names.get(&target.id) {
            return name.clone();
        }
        let mut base: String = format!("t_{}_{}", self.paths.dir_label(target.dir()), target.name())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if target.id.variant == Variant::Shared {
            base.push_str("_shared");
        }
        let mut name = base.clone();
        let mut n = 1;
        while !self.taken.insert(name.clone()) {
            n += 1;
            name = format!("{base}_{n}");
        }
        self.names.insert(target.id.clone(), name.clone());
        name
    }

    fn target(&mut self, graph: &ResolvedGraph, target: &Target) {
        if matches!(target.kind, TargetKind::PrebuiltLibrary | TargetKind::ExtraExport) {
            return;
        }

        let var = self.name_for(target);
        let env = format!("{var}_env");
        let resolved = &target.resolved;

        self.line("");
        self.line(format!("# {}", label_of(target)));
        self.line(format!("{env} = env.Clone()"));
        self.line(format!(
            "{env}.Append(CPPPATH={}, CPPDEFINES={}, LIBPATH={})",
            list(resolved.headers.iter().map(|p| path(p))),
            list(target.defines.iter().map(|d| quote(d))),
            list(resolved.lib_paths.iter().map(|p| path(p))),
        ));

        let mut srcs: Vec<String> = target.srcs.iter().map(|p| path(p)).collect();
        if target.kind == TargetKind::ProtoLibrary {
            srcs = self.proto_sources(target);
        }

        let libs: Vec<String> = resolved
            .libraries
            .iter()
            .filter_map(|id| self.names.get(id).cloned())
            .chain(
                resolved
                    .prebuilt_static
                    .iter()
                    .chain(&resolved.prebuilt_dynamic)
                    .map(|id| quote(&id.name)),
            )
            .chain(resolved.system_libraries.iter().map(|l| quote(l)))
            .collect();

        let builder = match (target.kind, target.id.variant) {
            (TargetKind::Library, Variant::Shared) => "SharedLibrary",
            (TargetKind::Library | TargetKind::ProtoLibrary, _) => "StaticLibrary",
            _ => "Program",
        };

        let mut args = vec![path(&target.output), list(srcs)];
        if !libs.is_empty() {
            args.push(format!("LIBS={}", list(libs)));
        }
        if !resolved.force_link.is_empty() {
            let archives = resolved
                .force_link
                .iter()
                .filter_map(|id| graph.registry.get(id))
                .map(|lib| path(&lib.output));
            let flags = std::iter::once(quote("-Wl,--whole-archive"))
                .chain(archives)
                .chain(std::iter::once(quote("-Wl,--no-whole-archive")));
            args.push(format!("LINKFLAGS={env}[\"LINKFLAGS\"] + {}", list(flags)));
        }
        self.line(format!("{var} = {env}.{builder}({})", args.join(", ")));

        for dep in &resolved.build_deps {
            if let Some(dep_var) = self.names.get(dep).cloned() {
                self.line(format!("{env}.Depends({var}, {dep_var})"));
            }
        }
    }

    /// Emit a `Proto` call per schema and return the generated `.pb.cc` files.
    fn proto_sources(&mut self, target: &Target) -> Vec<String> {
        let mut generated = Vec::new();
        for src in &target.srcs {
            if src.extension().is_none_or(|ext| ext != "proto") {
                generated.push(path(src));
                continue;
            }
            let rel = self.paths.relative(src).with_extension("");
            let base = self.paths.build_root().join(rel);
            let cc = PathBuf::from(format!("{}.pb.cc", base.display()));
            let h = PathBuf::from(format!("{}.pb.h", base.display()));
            self.line(format!(
                "env.Proto({}, {})",
                list([path(&cc), path(&h)]),
                quote(&self.paths.relative(src).to_string_lossy())
            ));
            generated.push(path(&cc));
        }
        generated
    }

    fn install(&mut self, target: &Target, prefix: &Path) {
        if !installs_something(target) {
            return;
        }
        match target.kind {
            TargetKind::Library | TargetKind::Binary => {
                let Some(var) = self.names.get(&target.id).cloned() else {
                    return;
                };
                let dest = if target.kind == TargetKind::Binary { "bin" } else { "lib" };
                let node = format!("{var}_install");
                self.line(format!(
                    "{node} = env.Install({}, {var})",
                    path(&prefix.join(dest))
                ));
                self.installs.push(node);
            }
            TargetKind::ExtraExport => {
                for mapping in &target.install {
                    self.installs.push(format!(
                        "env.Install({}, {})",
                        path(&prefix.join(&mapping.dest_dir)),
                        path(&mapping.source)
                    ));
                }
            }
            _ => {}
        }
    }
}

fn label_of(target: &Target) -> String {
    match target.id.variant {
        Variant::Primary => target.label.clone(),
        Variant::Shared => format!("{} (shared)", target.label),
    }
}

/// A Python string literal.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn path(p: &Path) -> String {
    quote(&p.to_string_lossy())
}

fn list(items: impl IntoIterator<Item = String>) -> String {
    format!("[{}]", items.into_iter().collect::<Vec<_>>().join(", "))
}
