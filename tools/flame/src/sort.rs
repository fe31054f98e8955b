//! Leaves-first ordering of the registry.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ResolveError, ResolveResult};
use crate::model::TargetId;
use crate::paths::ProjectPaths;
use crate::registry::TargetRegistry;

/// Sort every registered target so that each appears after all of its
/// dependencies, using Kahn's algorithm.
///
/// Each round extracts all targets with no outstanding dependencies, in
/// `TargetId` order, so the result is the same for the same registry.
pub fn topological_order(
    registry: &TargetRegistry,
    paths: &ProjectPaths,
) -> ResolveResult<Vec<TargetId>> {
    let mut outstanding: BTreeMap<TargetId, BTreeSet<TargetId>> = registry
        .iter()
        .map(|t| (t.id.clone(), t.deps.iter().map(|d| d.id.clone()).collect()))
        .collect();

    let mut order = Vec::with_capacity(outstanding.len());
    while !outstanding.is_empty() {
        let group: Vec<TargetId> = outstanding
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        if group.is_empty() {
            return Err(stalled(registry, paths, &outstanding));
        }

        for id in &group {
            outstanding.remove(id);
        }
        for deps in outstanding.values_mut() {
            for id in &group {
                deps.remove(id);
            }
        }
        order.extend(group);
    }

    Ok(order)
}

/// Explain why no target could be extracted: an unregistered dependency if
/// there is one, otherwise a cycle.
fn stalled(
    registry: &TargetRegistry,
    paths: &ProjectPaths,
    outstanding: &BTreeMap<TargetId, BTreeSet<TargetId>>,
) -> ResolveError {
    for target in outstanding.keys().filter_map(|id| registry.get(id)) {
        if let Some(dep) = target.deps.iter().find(|d| !registry.contains(&d.id)) {
            return ResolveError::MissingDependency {
                dependency: paths.label(&dep.id.dir, &dep.id.name),
                spec: dep.spec.clone(),
                requester: target.label.clone(),
            };
        }
    }

    // Every remaining target has an outstanding dependency that is itself
    // remaining, so walking first edges must revisit a target.
    let mut chain: Vec<&TargetId> = Vec::new();
    let mut current = outstanding.keys().next();
    while let Some(id) = current {
        if let Some(start) = chain.iter().position(|seen| *seen == id) {
            let mut cycle: Vec<String> = chain[start..].iter().map(|id| label(registry, id)).collect();
            cycle.push(label(registry, id));
            return ResolveError::Cycle { chain: cycle };
        }
        chain.push(id);
        current = outstanding.get(id).and_then(|deps| deps.iter().next());
    }

    ResolveError::Cycle {
        chain: chain.iter().map(|id| label(registry, id)).collect(),
    }
}

fn label(registry: &TargetRegistry, id: &TargetId) -> String {
    registry
        .get(id)
        .map(|t| t.label.clone())
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Target, TargetKind};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn paths() -> ProjectPaths {
        ProjectPaths::new(PathBuf::from("/p"), "flame-bin")
    }

    fn registry(targets: Vec<Target>) -> TargetRegistry {
        let mut registry = TargetRegistry::new();
        for t in targets {
            registry.insert(t);
        }
        registry
    }

    fn labels(registry: &TargetRegistry, order: &[TargetId]) -> Vec<String> {
        order.iter().map(|id| label(registry, id)).collect()
    }

    #[test]
    fn dependencies_come_first() {
        let registry = registry(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("lib", "mid"), ("util", "z")]),
            Target::stub(TargetKind::Library, "lib", "mid", &[("lib", "base")]),
            Target::stub(TargetKind::Library, "lib", "base", &[]),
            Target::stub(TargetKind::Library, "util", "z", &[("lib", "base")]),
        ]);

        let order = topological_order(&registry, &paths()).unwrap();
        assert_eq!(
            labels(&registry, &order),
            vec!["//lib:base", "//lib:mid", "//util:z", "//app:app"]
        );

        for (pos, id) in order.iter().enumerate() {
            for dep in &registry.get(id).unwrap().deps {
                let dep_pos = order.iter().position(|o| *o == dep.id).unwrap();
                assert!(dep_pos < pos, "{} sorted before its dependency", id);
            }
        }
    }

    #[test]
    fn groups_are_ordered_by_id() {
        let targets = || {
            vec![
                Target::stub(TargetKind::Library, "b", "y", &[]),
                Target::stub(TargetKind::Library, "a", "x", &[]),
                Target::stub(TargetKind::Library, "a", "w", &[]),
            ]
        };
        let forward = registry(targets());
        let backward = registry(targets().into_iter().rev().collect());

        let first = topological_order(&forward, &paths()).unwrap();
        let second = topological_order(&backward, &paths()).unwrap();
        assert_eq!(first, second);
        assert_eq!(labels(&forward, &first), vec!["//a:w", "//a:x", "//b:y"]);
    }

    #[test]
    fn two_target_cycle_is_a_cycle() {
        let registry = registry(vec![
            Target::stub(TargetKind::Library, "lib", "a", &[("lib", "b")]),
            Target::stub(TargetKind::Library, "lib", "b", &[("lib", "a")]),
        ]);

        let err = topological_order(&registry, &paths()).unwrap_err();
        match &err {
            ResolveError::Cycle { chain } => {
                assert_eq!(chain, &["//lib:a", "//lib:b", "//lib:a"]);
            }
            other => panic!("expected a cycle, got: {other}"),
        }
        assert!(err.to_string().contains("//lib:a -> //lib:b -> //lib:a"));
    }

    #[test]
    fn cycle_chain_excludes_dependents() {
        let registry = registry(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("lib", "a")]),
            Target::stub(TargetKind::Library, "lib", "a", &[("lib", "b")]),
            Target::stub(TargetKind::Library, "lib", "b", &[("lib", "c")]),
            Target::stub(TargetKind::Library, "lib", "c", &[("lib", "a")]),
        ]);

        let err = topological_order(&registry, &paths()).unwrap_err();
        let ResolveError::Cycle { chain } = err else {
            panic!("expected a cycle, got: {err}");
        };
        assert_eq!(chain, vec!["//lib:a", "//lib:b", "//lib:c", "//lib:a"]);
    }

    #[test]
    fn unregistered_dependency_is_not_a_cycle() {
        let registry = registry(vec![
            Target::stub(TargetKind::Binary, "app", "app", &[("missing", "thing")]),
        ]);

        let err = topological_order(&registry, &paths()).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, ResolveError::MissingDependency { .. }), "got: {msg}");
        assert!(msg.contains("//missing:thing"), "got: {msg}");
        assert!(msg.contains("required by //app:app"), "got: {msg}");
    }
}
