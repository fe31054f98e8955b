//! Rhai evaluation of `BUILD` files.
//!
//! A `BUILD` file is a Rhai script restricted to the flame entry points:
//!
//! ```text
//! cc_library("base").srcs(["*.cc"]).includes(["include"]).deps(["#pthread"]);
//! cc_binary("server").srcs(["main.cc"]).deps([":base", "//common/log:log"]);
//! cc_test("base_test").srcs(["base_test.cc"]).deps([":base"]).testdata(["data"]);
//! proto_library("msg").srcs(["msg.proto"]);
//! extra_export().headers(["base.h"]).configs(["server.conf"]);
//! ```
//!
//! Evaluation only records [`TargetDecl`]s in call order. Nothing is resolved
//! or registered here; the loader decides which declarations to materialize.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rhai::{Array, Dynamic, Engine, EvalAltResult};

use crate::error::{ResolveError, ResolveResult};
use crate::model::{DefinitionFile, ExportMode, TargetDecl, TargetKind, TestData};

/// Declarations recorded by one evaluation, shared with every builder.
type SharedDecls = Arc<Mutex<Vec<TargetDecl>>>;

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Operation budget per file; definition files are declarative and small.
const MAX_OPERATIONS: u64 = 1_000_000;

/// Read and evaluate the `BUILD` file at `path`.
pub fn evaluate_file(path: &Path, root: &Path) -> ResolveResult<DefinitionFile> {
    let source = std::fs::read_to_string(path).map_err(|e| ResolveError::io(path, e))?;
    evaluate_source(&source, path, root)
}

/// Evaluate `source` as the contents of the `BUILD` file at `path`.
pub fn evaluate_source(source: &str, path: &Path, root: &Path) -> ResolveResult<DefinitionFile> {
    let script_error = |message: String| ResolveError::Script {
        file: path.to_path_buf(),
        message,
    };

    let decls: SharedDecls = Arc::new(Mutex::new(Vec::new()));
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);
    engine.set_max_operations(MAX_OPERATIONS);
    engine.disable_symbol("eval");

    register_entry_points(&mut engine, &decls);
    register_list_options(&mut engine);
    register_library_options(&mut engine);
    register_testdata(&mut engine);
    register_helpers(&mut engine, root);

    let mut scope = rhai::Scope::new();
    let ast = engine
        .compile(source)
        .map_err(|e| script_error(e.to_string()))?;
    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| script_error(e.to_string()))?;

    // Builders left in the scope or captured by the engine still hold the Arc.
    drop(scope);
    drop(engine);

    let decls = std::mem::take(
        &mut *decls
            .lock()
            .map_err(|e| script_error(format!("poisoned declaration list: {e}")))?,
    );

    Ok(DefinitionFile {
        path: path.to_path_buf(),
        decls,
    })
}

// ---------------------------------------------------------------------------
// Entry points -> TargetBuilder
// ---------------------------------------------------------------------------

/// Handle returned by every entry point; methods edit the recorded declaration.
#[derive(Debug, Clone)]
struct TargetBuilder {
    decls: SharedDecls,
    index: usize,
}

impl TargetBuilder {
    fn update(
        &self,
        method: &str,
        kinds: &[TargetKind],
        f: impl FnOnce(&mut TargetDecl),
    ) -> FnResult<Self> {
        let mut decls = self.decls.lock().unwrap();
        let decl = &mut decls[self.index];
        if !kinds.contains(&decl.kind) {
            return Err(format!(
                "`{method}` is not supported by {} `{}`",
                decl.kind.as_str(),
                decl.name
            )
            .into());
        }
        f(decl);
        Ok(self.clone())
    }
}

fn declare(decls: &SharedDecls, kind: TargetKind, name: &str) -> FnResult<TargetBuilder> {
    if name.is_empty() || name.contains(['/', ':']) {
        return Err(format!("invalid {} name `{name}`", kind.as_str()).into());
    }
    let mut list = decls.lock().unwrap();
    list.push(TargetDecl::new(kind, name));
    Ok(TargetBuilder {
        decls: decls.clone(),
        index: list.len() - 1,
    })
}

fn register_entry_points(engine: &mut Engine, decls: &SharedDecls) {
    let entry_points = [
        ("cc_library", TargetKind::Library),
        ("cc_binary", TargetKind::Binary),
        ("cc_test", TargetKind::Test),
        ("proto_library", TargetKind::ProtoLibrary),
    ];
    for (fn_name, kind) in entry_points {
        let d = decls.clone();
        engine.register_fn(fn_name, move |name: &str| -> FnResult<TargetBuilder> {
            declare(&d, kind, name)
        });
    }

    // extra_export() takes no name; one per directory is the convention.
    let d = decls.clone();
    engine.register_fn("extra_export", move || -> FnResult<TargetBuilder> {
        declare(&d, TargetKind::ExtraExport, "extra_export")
    });
}

// ---------------------------------------------------------------------------
// String-list options
// ---------------------------------------------------------------------------

const COMPILED: &[TargetKind] = &[TargetKind::Library, TargetKind::Binary, TargetKind::Test];
const WITH_SOURCES: &[TargetKind] = &[
    TargetKind::Library,
    TargetKind::Binary,
    TargetKind::Test,
    TargetKind::ProtoLibrary,
];
const EXPORT_ONLY: &[TargetKind] = &[TargetKind::ExtraExport];

type ListSetter = fn(&mut TargetDecl, Vec<String>);

fn register_list_options(engine: &mut Engine) {
    let options: [(&'static str, &'static [TargetKind], ListSetter); 9] = [
        ("srcs", WITH_SOURCES, |d, v| d.srcs.extend(v)),
        ("deps", WITH_SOURCES, |d, v| d.deps.extend(v)),
        ("includes", COMPILED, |d, v| d.includes.extend(v)),
        ("defines", COMPILED, |d, v| d.defines.extend(v)),
        ("extra_include_paths", COMPILED, |d, v| d.extra_include_paths.extend(v)),
        ("extra_lib_paths", COMPILED, |d, v| d.extra_lib_paths.extend(v)),
        ("headers", EXPORT_ONLY, |d, v| d.headers.extend(v)),
        ("configs", EXPORT_ONLY, |d, v| d.configs.extend(v)),
        ("data", EXPORT_ONLY, |d, v| d.data.extend(v)),
    ];

    for (method, kinds, set) in options {
        engine.register_fn(
            method,
            move |b: &mut TargetBuilder, items: Array| -> FnResult<TargetBuilder> {
                let items = string_list(method, items)?;
                b.update(method, kinds, |decl| set(decl, items))
            },
        );
        // A single string is accepted wherever a list is.
        engine.register_fn(
            method,
            move |b: &mut TargetBuilder, item: &str| -> FnResult<TargetBuilder> {
                let item = item.to_string();
                b.update(method, kinds, |decl| set(decl, vec![item]))
            },
        );
    }
}

fn string_list(method: &str, items: Array) -> FnResult<Vec<String>> {
    items
        .into_iter()
        .map(|v| -> FnResult<String> {
            v.into_string()
                .map_err(|ty| format!("`{method}` expects strings, found {ty}").into())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Library-only options
// ---------------------------------------------------------------------------

const LIBRARY: &[TargetKind] = &[TargetKind::Library];

fn register_library_options(engine: &mut Engine) {
    engine.register_fn(
        "export_mode",
        |b: &mut TargetBuilder, mode: &str| -> FnResult<TargetBuilder> {
            let mode = ExportMode::parse(mode).ok_or_else(|| -> Box<EvalAltResult> {
                format!("unknown export mode `{mode}` (expected none, static, dynamic or both)")
                    .into()
            })?;
            b.update("export_mode", LIBRARY, |decl| decl.export_mode = mode)
        },
    );

    let flags: [(&'static str, fn(&mut TargetDecl, bool)); 3] = [
        ("link_all_symbols", |d, v| d.link_all_symbols = v),
        ("allow_export", |d, v| d.allow_export = v),
        ("prebuilt", |d, v| d.prebuilt = v),
    ];
    for (method, set) in flags {
        engine.register_fn(
            method,
            move |b: &mut TargetBuilder, value: bool| -> FnResult<TargetBuilder> {
                b.update(method, LIBRARY, |decl| set(decl, value))
            },
        );
    }
}

// ---------------------------------------------------------------------------
// cc_test testdata
// ---------------------------------------------------------------------------

fn register_testdata(engine: &mut Engine) {
    engine.register_fn(
        "testdata",
        |b: &mut TargetBuilder, items: Array| -> FnResult<TargetBuilder> {
            let entries = items
                .into_iter()
                .map(parse_testdata_entry)
                .collect::<FnResult<Vec<_>>>()?;
            b.update("testdata", &[TargetKind::Test], |decl| {
                decl.testdata.extend(entries)
            })
        },
    );
}

/// Parse a testdata entry.
///
/// Supports two forms:
/// - `"data/input.txt"`: staged under the same relative path
/// - `["data/input.txt", "input.txt"]`: explicit source and destination
fn parse_testdata_entry(entry: Dynamic) -> FnResult<TestData> {
    if entry.is_string() {
        let src = entry.into_string()?;
        return Ok(TestData {
            dest: src.clone(),
            src,
        });
    }
    if let Some(pair) = entry.try_cast::<Array>() {
        if let [src, dest] = pair.as_slice() {
            if let (Ok(src), Ok(dest)) = (src.clone().into_string(), dest.clone().into_string()) {
                return Ok(TestData { src, dest });
            }
        }
    }
    Err("`testdata` entries must be a path or a [source, destination] pair".into())
}

// ---------------------------------------------------------------------------
// Helper functions available in scripts
// ---------------------------------------------------------------------------

fn register_helpers(engine: &mut Engine, root: &Path) {
    let root = root.to_string_lossy().into_owned();

    // project_root() -> string
    engine.register_fn("project_root", move || -> String { root.clone() });

    // env("VAR") -> string, empty when unset
    engine.register_fn("env", |var: &str| -> String {
        std::env::var(var).unwrap_or_default()
    });
}
