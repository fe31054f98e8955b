//! Lazy, recursive loading of `BUILD` files into the target registry.
//!
//! `load(dir, Some(name))` materializes only the declarations called `name`
//! in `dir/BUILD`; `load(dir, None)` materializes all of them. Materializing a
//! declaration parses its `deps` and loads each dependency's directory,
//! restricted to the dependency's name, before registering the target. The
//! whole graph below a requested target is therefore registered when the
//! outermost `load` returns.
//!
//! Each (definition file, selection) pair is evaluated at most once per
//! [`ResolutionContext`], and each file's script runs at most once.
//!
//! `cc_test` declarations are skipped unless the context was created
//! [`with_tests`](ResolutionContext::with_tests), so test framework deps are
//! only loaded when tests are being built.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ProjectConfig;
use crate::deps::DependencyReference;
use crate::engine;
use crate::error::{ResolveError, ResolveResult};
use crate::model::{
    CopyPair, DefinitionFile, DirectDep, InstallMapping, ResolvedAttrs, Target, TargetDecl,
    TargetId, TargetKind,
};
use crate::paths::{ProjectPaths, normalize};
use crate::registry::TargetRegistry;
use crate::sources;
use crate::verbose::vprintln;

/// One active `load` call, innermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFrame {
    pub dir: PathBuf,
    pub selection: Option<String>,
}

/// The dependency a nested load is performed for. Only used for messages.
struct LoadRequest<'r> {
    dependency: String,
    requester: &'r str,
}

/// State of one resolution pass.
pub struct ResolutionContext<'a> {
    paths: &'a ProjectPaths,
    config: &'a ProjectConfig,
    registry: TargetRegistry,
    /// (definition file, selected name) pairs already evaluated.
    visited: HashSet<(PathBuf, Option<String>)>,
    /// Evaluated definition files by path.
    files: HashMap<PathBuf, Arc<DefinitionFile>>,
    /// Targets whose dependencies are being loaded right now.
    pending: HashSet<TargetId>,
    frames: Vec<LoadFrame>,
    evaluations: usize,
    with_tests: bool,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(paths: &'a ProjectPaths, config: &'a ProjectConfig) -> Self {
        Self {
            paths,
            config,
            registry: TargetRegistry::new(),
            visited: HashSet::new(),
            files: HashMap::new(),
            pending: HashSet::new(),
            frames: Vec::new(),
            evaluations: 0,
            with_tests: false,
        }
    }

    /// Also materialize `cc_test` declarations.
    pub fn with_tests(mut self, with_tests: bool) -> Self {
        self.with_tests = with_tests;
        self
    }

    fn wants(&self, decl: &TargetDecl) -> bool {
        self.with_tests || decl.target_kind() != TargetKind::Test
    }

    pub fn paths(&self) -> &ProjectPaths {
        self.paths
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> TargetRegistry {
        self.registry
    }

    /// Number of `BUILD` scripts evaluated so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Active load calls, outermost first. Empty between top-level loads.
    #[cfg(test)]
    pub fn frames(&self) -> &[LoadFrame] {
        &self.frames
    }

    /// Primary ids of every declaration in `dir/BUILD`, if it was evaluated.
    pub fn declared(&self, dir: &Path) -> Vec<TargetId> {
        self.files
            .get(&self.paths.definition_file(dir))
            .map(|def| {
                def.decls
                    .iter()
                    .filter(|d| self.wants(d))
                    .map(|d| TargetId::new(dir, d.name.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Load `dir/BUILD`, materializing only `selection` if given.
    pub fn load(&mut self, dir: &Path, selection: Option<&str>) -> ResolveResult<()> {
        self.load_for(dir, selection, None)
    }

    fn load_for(
        &mut self,
        dir: &Path,
        selection: Option<&str>,
        request: Option<&LoadRequest<'_>>,
    ) -> ResolveResult<()> {
        let file = self.paths.definition_file(dir);
        let key = (file.clone(), selection.map(str::to_string));
        if self.visited.contains(&key) {
            return Ok(());
        }

        if !file.is_file() {
            let context = request
                .map(|r| format!(" (needed for {}, required by {})", r.dependency, r.requester))
                .unwrap_or_default();
            return Err(ResolveError::MissingDefinitionFile {
                dir: format!("//{}", self.paths.dir_label(dir)),
                context,
            });
        }
        self.visited.insert(key);

        self.frames.push(LoadFrame {
            dir: dir.to_path_buf(),
            selection: selection.map(str::to_string),
        });
        let result = self.evaluate(&file, dir, selection);
        if result.is_err() {
            self.report_frame();
        }
        self.frames.pop();
        result
    }

    /// Print the innermost load in verbose mode, as a trail while an error unwinds.
    fn report_frame(&self) {
        if let Some(frame) = self.frames.last() {
            let dir = self.paths.dir_label(&frame.dir);
            match &frame.selection {
                Some(name) => vprintln!("  while loading //{dir} (only `{name}`)"),
                None => vprintln!("  while loading //{dir}"),
            }
        }
    }

    fn evaluate(&mut self, file: &Path, dir: &Path, selection: Option<&str>) -> ResolveResult<()> {
        let definition = self.definition(file)?;
        match selection {
            Some(name) => vprintln!("  loading //{} (only `{name}`)", self.paths.dir_label(dir)),
            None => vprintln!("  loading //{}", self.paths.dir_label(dir)),
        }

        let selected: Vec<&TargetDecl> = definition
            .decls
            .iter()
            .filter(|d| selection.is_none_or(|name| d.name == name) && self.wants(d))
            .collect();
        for decl in selected {
            self.materialize(dir, decl)?;
        }
        Ok(())
    }

    /// Evaluated contents of `file`, running its script on first use.
    fn definition(&mut self, file: &Path) -> ResolveResult<Arc<DefinitionFile>> {
        if let Some(def) = self.files.get(file) {
            return Ok(def.clone());
        }
        let def = Arc::new(engine::evaluate_file(file, self.paths.root())?);
        self.evaluations += 1;
        vprintln!("  evaluated {} ({} declarations)", def.path.display(), def.decls.len());
        self.files.insert(file.to_path_buf(), def.clone());
        Ok(def)
    }

    /// Register the target(s) a declaration describes, loading dependencies first.
    fn materialize(&mut self, dir: &Path, decl: &TargetDecl) -> ResolveResult<()> {
        let kind = decl.target_kind();
        let mut ids = vec![TargetId::new(dir, decl.name.as_str())];
        if kind == TargetKind::Library && decl.export_mode.has_dynamic() {
            ids.push(TargetId::shared(dir, decl.name.as_str()));
        }
        if ids
            .iter()
            .all(|id| self.registry.contains(id) || self.pending.contains(id))
        {
            return Ok(());
        }

        let label = self.paths.label(dir, &decl.name);
        let (deps, system_libraries) = self.parse_deps(dir, &label, kind, decl)?;

        self.pending.extend(ids.iter().cloned());
        let loaded = self.load_dependencies(&label, &deps);
        for id in &ids {
            self.pending.remove(id);
        }
        loaded?;

        let target = self.build_target(kind, dir, decl, label, deps, system_libraries);
        if ids.len() > 1 {
            let mut shared = target.clone();
            shared.id = TargetId::shared(dir, decl.name.as_str());
            shared.output = self
                .paths
                .output_dir(dir)
                .join(format!("lib{}.so", decl.name));
            self.registry.insert(shared);
        }
        self.registry.insert(target);
        Ok(())
    }

    /// Split `deps` (plus implicit framework deps) into graph edges and system libraries.
    fn parse_deps(
        &self,
        dir: &Path,
        label: &str,
        kind: TargetKind,
        decl: &TargetDecl,
    ) -> ResolveResult<(Vec<DirectDep>, Vec<String>)> {
        let implicit: &[String] = match kind {
            TargetKind::Test => &self.config.test.framework,
            TargetKind::ProtoLibrary => &self.config.proto.runtime,
            _ => &[],
        };

        let mut deps: Vec<DirectDep> = Vec::new();
        let mut system = Vec::new();
        for spec in decl.deps.iter().chain(implicit) {
            let reference = DependencyReference::parse(spec, label)?;
            if let DependencyReference::SystemLibrary(lib) = &reference {
                if !system.contains(lib) {
                    system.push(lib.clone());
                }
                continue;
            }
            if let Some(id) = reference.edge(dir, self.paths) {
                if !deps.iter().any(|d| d.id == id) {
                    deps.push(DirectDep {
                        spec: spec.clone(),
                        id,
                    });
                }
            }
        }
        Ok((deps, system))
    }

    fn load_dependencies(&mut self, label: &str, deps: &[DirectDep]) -> ResolveResult<()> {
        for dep in deps {
            // A pending dependency is an edge back into the current load stack,
            // i.e. a cycle; the sorter reports it once the registry is complete.
            if self.registry.contains(&dep.id) || self.pending.contains(&dep.id) {
                continue;
            }
            let request = LoadRequest {
                dependency: self.paths.label(&dep.id.dir, &dep.id.name),
                requester: label,
            };
            self.load_for(&dep.id.dir, Some(&dep.id.name), Some(&request))?;
        }
        Ok(())
    }

    fn build_target(
        &self,
        kind: TargetKind,
        dir: &Path,
        decl: &TargetDecl,
        label: String,
        deps: Vec<DirectDep>,
        system_libraries: Vec<String>,
    ) -> Target {
        let output_dir = self.paths.output_dir(dir);
        let name = decl.name.as_str();

        let srcs = match kind {
            TargetKind::PrebuiltLibrary | TargetKind::ExtraExport => Vec::new(),
            _ => self.expand(dir, &label, &decl.srcs),
        };

        let output = match kind {
            TargetKind::Library | TargetKind::ProtoLibrary => output_dir.join(format!("lib{name}.a")),
            TargetKind::PrebuiltLibrary => {
                let ext = if decl.export_mode.has_dynamic() { "so" } else { "a" };
                dir.join("lib").join(format!("lib{name}.{ext}"))
            }
            TargetKind::Binary | TargetKind::Test => output_dir.join(name),
            TargetKind::ExtraExport => output_dir.clone(),
        };

        let run_dir = (kind == TargetKind::Test).then(|| output_dir.join(format!("{name}.runfiles")));
        let testdata = match &run_dir {
            Some(run_dir) => decl
                .testdata
                .iter()
                .map(|t| CopyPair {
                    source: normalize(&dir.join(&t.src)),
                    dest: normalize(&run_dir.join(&t.dest)),
                })
                .collect(),
            None => Vec::new(),
        };

        let mut install = Vec::new();
        if kind == TargetKind::ExtraExport {
            let include_dir = match self.paths.dir_label(dir) {
                rel if rel.is_empty() => "include".to_string(),
                rel => format!("include/{rel}"),
            };
            for (files, dest_dir) in [
                (&decl.headers, include_dir.as_str()),
                (&decl.configs, "conf"),
                (&decl.data, "data"),
            ] {
                install.extend(self.expand(dir, &label, files).into_iter().map(|source| {
                    InstallMapping {
                        source,
                        dest_dir: dest_dir.to_string(),
                    }
                }));
            }
        }

        let resolve_all = |entries: &[String]| -> Vec<PathBuf> {
            entries.iter().map(|e| normalize(&dir.join(e))).collect()
        };

        Target {
            id: TargetId::new(dir, name),
            kind,
            label,
            srcs,
            includes: resolve_all(&decl.includes),
            defines: decl.defines.clone(),
            extra_include_paths: resolve_all(&decl.extra_include_paths),
            extra_lib_paths: resolve_all(&decl.extra_lib_paths),
            export_mode: decl.export_mode,
            link_all_symbols: decl.link_all_symbols,
            allow_export: decl.allow_export,
            output,
            run_dir,
            testdata,
            install,
            deps,
            system_libraries,
            resolved: ResolvedAttrs::default(),
        }
    }

    fn expand(&self, dir: &Path, label: &str, entries: &[String]) -> Vec<PathBuf> {
        let expanded = sources::expand(dir, entries);
        for pattern in &expanded.unmatched {
            vprintln!("  {label}: no files match `{pattern}`");
        }
        expanded.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::ROOT_MARKER;
    use pretty_assertions::assert_eq;

    /// A temporary project tree with `FLAME_ROOT` at its root.
    struct Fixture {
        _tmp: tempfile::TempDir,
        paths: ProjectPaths,
        config: ProjectConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            std::fs::write(tmp.path().join(ROOT_MARKER), "").unwrap();
            let paths = ProjectPaths::new(tmp.path().to_path_buf(), "flame-bin");
            let mut config = ProjectConfig::default();
            config.test.framework.clear();
            config.proto.runtime.clear();
            Self {
                _tmp: tmp,
                paths,
                config,
            }
        }

        fn build_file(&self, rel: &str, contents: &str) {
            let dir = self.dir(rel);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("BUILD"), contents).unwrap();
        }

        fn dir(&self, rel: &str) -> PathBuf {
            self.paths.from_root(rel)
        }

        fn id(&self, rel: &str, name: &str) -> TargetId {
            TargetId::new(self.dir(rel), name)
        }

        fn context(&self) -> ResolutionContext<'_> {
            ResolutionContext::new(&self.paths, &self.config)
        }
    }

    fn names(registry: &TargetRegistry) -> Vec<String> {
        registry.iter().map(|t| t.label.clone()).collect()
    }

    #[test]
    fn loading_twice_evaluates_once() {
        let fx = Fixture::new();
        fx.build_file("lib", r#"cc_library("a").srcs(["a.cc"]);"#);

        let mut ctx = fx.context();
        ctx.load(&fx.dir("lib"), Some("a")).unwrap();
        ctx.load(&fx.dir("lib"), Some("a")).unwrap();

        assert_eq!(ctx.registry().len(), 1);
        assert_eq!(ctx.evaluations(), 1);
    }

    #[test]
    fn selective_load_registers_only_the_closure() {
        let fx = Fixture::new();
        fx.build_file(
            "lib",
            r#"
            cc_library("a").deps([":b"]);
            cc_library("b");
            cc_library("c").deps(["not a valid dep"]);
            "#,
        );

        let mut ctx = fx.context();
        ctx.load(&fx.dir("lib"), Some("a")).unwrap();

        assert_eq!(names(ctx.registry()), vec!["//lib:a", "//lib:b"]);
        assert_eq!(ctx.evaluations(), 1);
    }

    #[test]
    fn whole_file_load_registers_everything() {
        let fx = Fixture::new();
        fx.build_file(
            "lib",
            r#"
            cc_library("a").deps([":b"]);
            cc_library("b").export_mode("both");
            cc_binary("tool").deps([":a"]);
            "#,
        );

        let mut ctx = fx.context();
        ctx.load(&fx.dir("lib"), None).unwrap();

        let registry = ctx.registry();
        assert_eq!(registry.len(), 4);
        assert!(registry.contains(&TargetId::shared(fx.dir("lib"), "b")));
        let shared = registry.get(&TargetId::shared(fx.dir("lib"), "b")).unwrap();
        assert!(shared.output.ends_with("flame-bin/lib/libb.so"));
    }

    #[test]
    fn qualified_dependencies_load_other_directories() {
        let fx = Fixture::new();
        fx.build_file("app", r##"cc_binary("app").deps(["//common/log:log", "#rt"]);"##);
        fx.build_file("common/log", r#"cc_library("log").deps(["//common/base/:base"]);"#);
        fx.build_file(
            "common/base",
            r#"cc_library("base"); cc_library("unused").deps(["//nowhere:x"]);"#,
        );

        let mut ctx = fx.context();
        ctx.load(&fx.dir("app"), None).unwrap();

        assert_eq!(
            names(ctx.registry()),
            vec!["//app:app", "//common/base:base", "//common/log:log"]
        );
        let app = ctx.registry().get(&fx.id("app", "app")).unwrap();
        assert_eq!(app.system_libraries, vec!["rt"]);
        assert_eq!(app.deps[0].spec, "//common/log:log");
        assert_eq!(app.deps[0].id, fx.id("common/log", "log"));
        assert_eq!(ctx.evaluations(), 3);
    }

    #[test]
    fn diamond_loads_shared_dependency_once() {
        let fx = Fixture::new();
        fx.build_file("app", r#"cc_binary("app").deps(["//x:x", "//y:y"]);"#);
        fx.build_file("x", r#"cc_library("x").deps(["//base:base"]);"#);
        fx.build_file("y", r#"cc_library("y").deps(["//base:base"]);"#);
        fx.build_file("base", r#"cc_library("base");"#);

        let mut ctx = fx.context();
        ctx.load(&fx.dir("app"), None).unwrap();

        assert_eq!(ctx.registry().len(), 4);
        assert_eq!(ctx.evaluations(), 4);
    }

    #[test]
    fn missing_definition_file_names_target_and_requester() {
        let fx = Fixture::new();
        fx.build_file("app", r#"cc_binary("app").deps(["//missing:thing"]);"#);

        let mut ctx = fx.context();
        let err = ctx.load(&fx.dir("app"), None).unwrap_err();

        assert!(matches!(err, ResolveError::MissingDefinitionFile { .. }));
        let msg = err.to_string();
        assert!(msg.contains("//missing:thing"), "unexpected error: {msg}");
        assert!(msg.contains("required by //app:app"), "unexpected error: {msg}");
        assert!(ctx.frames().is_empty(), "load frames leaked: {:?}", ctx.frames());
    }

    #[test]
    fn cycles_terminate_and_register_both_targets() {
        let fx = Fixture::new();
        fx.build_file("lib", r#"cc_library("a").deps([":b"]); cc_library("b").deps([":a"]);"#);

        let mut ctx = fx.context();
        ctx.load(&fx.dir("lib"), Some("a")).unwrap();

        assert_eq!(names(ctx.registry()), vec!["//lib:a", "//lib:b"]);
    }

    #[test]
    fn malformed_dependency_fails_the_load() {
        let fx = Fixture::new();
        fx.build_file("lib", r#"cc_library("a").deps(["//x:y:z"]);"#);

        let mut ctx = fx.context();
        let err = ctx.load(&fx.dir("lib"), None).unwrap_err();
        assert!(err.to_string().contains("//lib:a"), "unexpected error: {err}");
        assert!(ctx.frames().is_empty());
    }

    #[test]
    fn implicit_framework_deps_are_added() {
        let mut fx = Fixture::new();
        fx.config.test.framework = vec!["//gtest:gtest".into(), "#pthread".into()];
        fx.build_file("gtest", r#"cc_library("gtest");"#);
        fx.build_file(
            "app",
            r#"cc_test("app_test").srcs(["t.cc"]).testdata(["data/in.txt", ["golden", "out"]]);"#,
        );

        let mut ctx = fx.context().with_tests(true);
        ctx.load(&fx.dir("app"), None).unwrap();

        let test = ctx.registry().get(&fx.id("app", "app_test")).unwrap();
        assert_eq!(test.deps.len(), 1);
        assert_eq!(test.deps[0].id, fx.id("gtest", "gtest"));
        assert_eq!(test.system_libraries, vec!["pthread"]);

        let run_dir = test.run_dir.clone().unwrap();
        assert!(run_dir.ends_with("flame-bin/app/app_test.runfiles"));
        assert_eq!(
            test.testdata,
            vec![
                CopyPair {
                    source: fx.dir("app/data/in.txt"),
                    dest: run_dir.join("data/in.txt"),
                },
                CopyPair {
                    source: fx.dir("app/golden"),
                    dest: run_dir.join("out"),
                },
            ]
        );
    }

    #[test]
    fn tests_are_skipped_outside_test_mode() {
        let mut fx = Fixture::new();
        fx.config.test.framework = vec!["//thirdparty/gtest:gtest".into()];
        fx.build_file(
            "app",
            r#"cc_library("lib"); cc_test("lib_test").deps([":lib"]);"#,
        );

        let mut ctx = fx.context();
        ctx.load(&fx.dir("app"), None).unwrap();
        assert_eq!(names(ctx.registry()), vec!["//app:lib"]);
        assert_eq!(ctx.declared(&fx.dir("app")), vec![fx.id("app", "lib")]);

        let err = fx
            .context()
            .with_tests(true)
            .load(&fx.dir("app"), None)
            .unwrap_err();
        assert!(
            err.to_string().contains("required by //app:lib_test"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn prebuilt_and_export_targets() {
        let fx = Fixture::new();
        fx.build_file(
            "third/z",
            r#"
            cc_library("z").prebuilt(true).export_mode("dynamic");
            extra_export().headers(["*.h"]).configs(["z.conf"]);
            "#,
        );
        std::fs::write(fx.dir("third/z/z.h"), "").unwrap();

        let mut ctx = fx.context();
        ctx.load(&fx.dir("third/z"), None).unwrap();

        let z = ctx.registry().get(&fx.id("third/z", "z")).unwrap();
        assert_eq!(z.kind, TargetKind::PrebuiltLibrary);
        assert_eq!(z.output, fx.dir("third/z/lib/libz.so"));
        assert!(!ctx.registry().contains(&TargetId::shared(fx.dir("third/z"), "z")));

        let export = ctx.registry().get(&fx.id("third/z", "extra_export")).unwrap();
        assert_eq!(
            export.install,
            vec![
                InstallMapping {
                    source: fx.dir("third/z/z.h"),
                    dest_dir: "include/third/z".into(),
                },
                InstallMapping {
                    source: fx.dir("third/z/z.conf"),
                    dest_dir: "conf".into(),
                },
            ]
        );
    }
}
