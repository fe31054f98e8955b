//! Source list expansion.
//!
//! Entries with `*` or `?` are matched per path segment against the files
//! under the declaring directory; wildcards never cross a `/`. Entries
//! without wildcards are kept as written, existing or not: the backend owns
//! reporting missing sources.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::paths::normalize;

/// Result of expanding one target's `srcs`.
#[derive(Debug, Default)]
pub struct Expanded {
    /// Absolute paths, declaration order, duplicates removed.
    pub files: Vec<PathBuf>,
    /// Patterns that matched nothing.
    pub unmatched: Vec<String>,
}

pub fn has_wildcard(entry: &str) -> bool {
    entry.contains(['*', '?'])
}

/// Expand `entries` relative to `dir`.
pub fn expand(dir: &Path, entries: &[String]) -> Expanded {
    let mut out = Expanded::default();
    let mut seen = HashSet::new();

    for entry in entries {
        if !has_wildcard(entry) {
            let path = normalize(&dir.join(entry));
            if seen.insert(path.clone()) {
                out.files.push(path);
            }
            continue;
        }

        let pattern: Vec<&str> = entry.split('/').filter(|s| !s.is_empty()).collect();
        let mut matched = false;
        for file in WalkDir::new(dir)
            .min_depth(pattern.len())
            .max_depth(pattern.len())
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
        {
            let Ok(rel) = file.path().strip_prefix(dir) else {
                continue;
            };
            let segments: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let is_match = segments.len() == pattern.len()
                && pattern
                    .iter()
                    .zip(&segments)
                    .all(|(p, s)| wildcard_match(p, s));
            if is_match {
                matched = true;
                let path = file.path().to_path_buf();
                if seen.insert(path.clone()) {
                    out.files.push(path);
                }
            }
        }
        if !matched {
            out.unmatched.push(entry.clone());
        }
    }

    out
}

/// Match one path segment against a pattern with `*` (any run) and `?` (one char).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, absorbed)) = backtrack {
            pi = star + 1;
            ti = absorbed + 1;
            backtrack = Some((star, absorbed + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wildcard_segments() {
        assert!(wildcard_match("*.cc", "base.cc"));
        assert!(wildcard_match("*_test.cc", "base_test.cc"));
        assert!(wildcard_match("b?se.*", "base.h"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("*.cc", "base.h"));
        assert!(!wildcard_match("b?se.cc", "bse.cc"));
    }

    #[test]
    fn expands_globs_in_sorted_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        for f in ["b.cc", "a.cc", "c.h"] {
            std::fs::write(dir.join(f), "").unwrap();
        }
        std::fs::create_dir(dir.join("impl")).unwrap();
        std::fs::write(dir.join("impl/x.cc"), "").unwrap();

        let out = expand(
            dir,
            &["main.cc".into(), "*.cc".into(), "impl/*.cc".into(), "*.proto".into()],
        );
        let names: Vec<_> = out
            .files
            .iter()
            .map(|p| p.strip_prefix(dir).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["main.cc", "a.cc", "b.cc", "impl/x.cc"]);
        assert_eq!(out.unmatched, vec!["*.proto"]);
    }

    #[test]
    fn duplicates_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.cc"), "").unwrap();
        let out = expand(tmp.path(), &["a.cc".into(), "*.cc".into()]);
        assert_eq!(out.files.len(), 1);
    }
}
