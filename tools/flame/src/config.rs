//! Project configuration read from the `FLAME_ROOT` marker file.
//!
//! The marker may be empty; every section and key has a default. Implicit
//! dependencies (test framework, proto runtime) are ordinary deps strings
//! and go through the same parser as user-written `deps`.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ResolveError, ResolveResult};
use crate::paths::ROOT_MARKER;

/// Top-level configuration loaded from `FLAME_ROOT`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub build: BuildSection,
    pub proto: ProtoSection,
    pub test: TestSection,
}

/// `[build]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    /// Output root relative to the project root.
    pub dir: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            dir: "flame-bin".into(),
        }
    }
}

/// `[proto]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtoSection {
    /// `protoc` path relative to the project root.
    pub protoc: String,
    /// Extra `-I` directory for `protoc`, relative to the project root.
    pub include: String,
    /// Deps added to every `proto_library`.
    pub runtime: Vec<String>,
}

impl Default for ProtoSection {
    fn default() -> Self {
        Self {
            protoc: "thirdparty/protobuf/bin/protoc".into(),
            include: "thirdparty".into(),
            runtime: vec!["//thirdparty/protobuf:protobuf".into()],
        }
    }
}

/// `[test]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestSection {
    /// Deps added to every `cc_test`.
    pub framework: Vec<String>,
}

impl Default for TestSection {
    fn default() -> Self {
        Self {
            framework: vec![
                "//thirdparty/gtest:gtest".into(),
                "//thirdparty/gtest:gtest_main".into(),
                "#pthread".into(),
            ],
        }
    }
}

impl ProjectConfig {
    /// Parse `<root>/FLAME_ROOT`.
    pub fn load(root: &Path) -> ResolveResult<Self> {
        let path = root.join(ROOT_MARKER);
        let contents =
            std::fs::read_to_string(&path).map_err(|e| ResolveError::io(&path, e))?;
        Self::parse(&contents).map_err(|message| ResolveError::Config { path, message })
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }
}
