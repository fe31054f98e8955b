//! Transitive closure aggregation.
//!
//! Walks the leaves-first order once. By the time a target is visited, the
//! resolved attributes of all its dependencies are final, so each target only
//! looks one edge deep.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::{ResolveError, ResolveResult};
use crate::model::{ResolvedAttrs, TargetId, TargetKind};
use crate::registry::TargetRegistry;

/// Fill in `resolved` for every target in `order`.
pub fn aggregate(registry: &mut TargetRegistry, order: &[TargetId]) -> ResolveResult<()> {
    let position: HashMap<&TargetId, usize> =
        order.iter().enumerate().map(|(i, id)| (id, i)).collect();

    for id in order {
        let Some(attrs) = resolve_one(registry, id, &position)? else {
            continue;
        };
        if let Some(target) = registry.get_mut(id) {
            target.resolved = attrs;
        }
    }
    Ok(())
}

fn resolve_one(
    registry: &TargetRegistry,
    id: &TargetId,
    position: &HashMap<&TargetId, usize>,
) -> ResolveResult<Option<ResolvedAttrs>> {
    let Some(target) = registry.get(id) else {
        return Ok(None);
    };

    let mut attrs = ResolvedAttrs {
        system_libraries: target.system_libraries.clone(),
        headers: target
            .includes
            .iter()
            .chain(&target.extra_include_paths)
            .cloned()
            .collect(),
        lib_paths: target.extra_lib_paths.clone(),
        ..ResolvedAttrs::default()
    };

    for dep in &target.deps {
        let Some(dep_target) = registry.get(&dep.id) else {
            return Err(ResolveError::MissingDependency {
                dependency: dep.id.to_string(),
                spec: dep.spec.clone(),
                requester: target.label.clone(),
            });
        };

        if !dep_target.kind.is_linkable() {
            return Err(ResolveError::NotLinkable {
                requester: target.label.clone(),
                dependency: dep_target.label.clone(),
                kind: dep_target.kind.as_str(),
            });
        }
        if dep_target.kind == TargetKind::PrebuiltLibrary {
            if dep_target.export_mode.has_dynamic() {
                attrs.prebuilt_dynamic.push(dep.id.clone());
            } else {
                attrs.prebuilt_static.push(dep.id.clone());
            }
            attrs.lib_paths.push(dep_target.dir().join("lib"));
        } else {
            attrs.libraries.push(dep.id.clone());
        }

        let resolved = &dep_target.resolved;
        attrs.libraries.extend(resolved.libraries.iter().cloned());
        attrs.prebuilt_static.extend(resolved.prebuilt_static.iter().cloned());
        attrs.prebuilt_dynamic.extend(resolved.prebuilt_dynamic.iter().cloned());
        attrs.system_libraries.extend(resolved.system_libraries.iter().cloned());
        attrs.headers.extend(resolved.headers.iter().cloned());
        attrs.lib_paths.extend(resolved.lib_paths.iter().cloned());
    }

    dedup(&mut attrs.libraries);
    dedup(&mut attrs.prebuilt_static);
    dedup(&mut attrs.prebuilt_dynamic);
    dedup(&mut attrs.system_libraries);
    dedup(&mut attrs.headers);
    dedup(&mut attrs.lib_paths);

    // Dependents sit later in leaves-first order and must be linked first.
    let link_rank = |id: &TargetId| std::cmp::Reverse(position.get(id).copied().unwrap_or(0));
    attrs.libraries.sort_by_key(link_rank);
    attrs.prebuilt_static.sort_by_key(link_rank);
    attrs.prebuilt_dynamic.sort_by_key(link_rank);

    if target.kind.is_executable() {
        let (force, normal): (Vec<_>, Vec<_>) = attrs
            .libraries
            .into_iter()
            .partition(|lib| registry.get(lib).is_some_and(|t| t.link_all_symbols));
        attrs.libraries = normal;
        attrs.build_deps = force.clone();
        attrs.force_link = force;
    }

    Ok(Some(attrs))
}

/// Remove repeated entries, keeping the first occurrence.
fn dedup<T: Clone + Eq + Hash>(items: &mut Vec<T>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExportMode, Target};
    use crate::paths::ProjectPaths;
    use crate::sort::topological_order;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn resolve(targets: Vec<Target>) -> ResolveResult<TargetRegistry> {
        let mut registry = TargetRegistry::new();
        for t in targets {
            registry.insert(t);
        }
        let paths = ProjectPaths::new(PathBuf::from("/p"), "flame-bin");
        let order = topological_order(&registry, &paths)?;
        aggregate(&mut registry, &order)?;
        Ok(registry)
    }

    fn resolved<'r>(registry: &'r TargetRegistry, dir: &str, name: &str) -> &'r ResolvedAttrs {
        &registry
            .get(&TargetId::new(format!("/p/{dir}"), name))
            .unwrap()
            .resolved
    }

    fn names(ids: &[TargetId]) -> Vec<&str> {
        ids.iter().map(|id| id.name.as_str()).collect()
    }

    #[test]
    fn chain_links_dependents_first() {
        let registry = resolve(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("app", "mid")]),
            Target::stub(TargetKind::Library, "app", "mid", &[("app", "base")]),
            Target::stub(TargetKind::Library, "app", "base", &[]),
        ])
        .unwrap();

        assert_eq!(names(&resolved(&registry, "app", "app").libraries), vec!["mid", "base"]);
        assert_eq!(names(&resolved(&registry, "app", "mid").libraries), vec!["base"]);
        assert!(resolved(&registry, "app", "base").libraries.is_empty());
    }

    #[test]
    fn diamond_lists_shared_base_once_and_last() {
        let registry = resolve(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("x", "x"), ("y", "y")]),
            Target::stub(TargetKind::Library, "x", "x", &[("base", "base")]),
            Target::stub(TargetKind::Library, "y", "y", &[("base", "base")]),
            Target::stub(TargetKind::Library, "base", "base", &[]),
        ])
        .unwrap();

        let libs = names(&resolved(&registry, "app", "app").libraries);
        assert_eq!(libs.iter().filter(|n| **n == "base").count(), 1);
        assert_eq!(libs.last(), Some(&"base"));
        assert_eq!(libs.len(), 3);
    }

    #[test]
    fn link_order_respects_transitive_dependencies() {
        // `a` reaches `c` both directly and through `b`.
        let registry = resolve(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("lib", "c"), ("lib", "a")]),
            Target::stub(TargetKind::Library, "lib", "a", &[("lib", "c"), ("lib", "b")]),
            Target::stub(TargetKind::Library, "lib", "b", &[("lib", "c")]),
            Target::stub(TargetKind::Library, "lib", "c", &[]),
        ])
        .unwrap();

        assert_eq!(
            names(&resolved(&registry, "app", "app").libraries),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn force_linked_libraries_move_to_their_own_list() {
        let mut registered = Target::stub(TargetKind::Library, "plugins", "registered", &[("lib", "base")]);
        registered.link_all_symbols = true;

        let registry = resolve(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("lib", "mid")]),
            Target::stub(TargetKind::Library, "lib", "mid", &[("plugins", "registered")]),
            registered,
            Target::stub(TargetKind::Library, "lib", "base", &[]),
        ])
        .unwrap();

        let app = resolved(&registry, "app", "app");
        assert_eq!(names(&app.libraries), vec!["mid", "base"]);
        assert_eq!(names(&app.force_link), vec!["registered"]);
        assert_eq!(app.build_deps, app.force_link);

        // Libraries keep the flagged dependency in their normal list.
        let mid = resolved(&registry, "lib", "mid");
        assert_eq!(names(&mid.libraries), vec!["registered", "base"]);
        assert!(mid.force_link.is_empty());
    }

    #[test]
    fn prebuilt_dependencies_are_split_by_export_mode() {
        let mut z = Target::stub(TargetKind::PrebuiltLibrary, "third/z", "z", &[]);
        z.export_mode = ExportMode::Dynamic;
        let ssl = Target::stub(TargetKind::PrebuiltLibrary, "third/ssl", "ssl", &[]);
        let mut net = Target::stub(TargetKind::Library, "net", "net", &[("third/ssl", "ssl")]);
        net.system_libraries = vec!["rt".into()];
        net.includes = vec![PathBuf::from("/p/net/include")];

        let registry = resolve(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("net", "net"), ("third/z", "z")]),
            net,
            z,
            ssl,
        ])
        .unwrap();

        let app = resolved(&registry, "app", "app");
        assert_eq!(names(&app.libraries), vec!["net"]);
        assert_eq!(names(&app.prebuilt_static), vec!["ssl"]);
        assert_eq!(names(&app.prebuilt_dynamic), vec!["z"]);
        assert_eq!(app.system_libraries, vec!["rt"]);
        assert_eq!(app.headers, vec![PathBuf::from("/p/net/include")]);
        assert_eq!(
            app.lib_paths,
            vec![PathBuf::from("/p/third/ssl/lib"), PathBuf::from("/p/third/z/lib")]
        );
    }

    #[test]
    fn depending_on_a_binary_is_rejected() {
        let err = resolve(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("tools", "gen")]),
            Target::stub(TargetKind::Binary, "tools", "gen", &[]),
        ])
        .unwrap_err();

        let msg = err.to_string();
        assert!(matches!(err, ResolveError::NotLinkable { .. }), "got: {msg}");
        assert!(msg.contains("//tools:gen"), "got: {msg}");
        assert!(msg.contains("cc_binary"), "got: {msg}");
    }
}
