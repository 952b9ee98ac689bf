// src/query.rs

//! Query expressions for triggers.
//!
//! The full query language lives outside this crate; triggers only need a
//! way to ask "does this changed path interest me?". That seam is the
//! [`PathMatcher`] trait, and the one implementation provided here compiles
//! include/exclude glob lists against paths relative to the watch root.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::errors::TriggerConfigError;

/// Decides whether a root-relative path matches a trigger's interest.
pub trait PathMatcher: Send + Sync {
    fn matches(&self, rel_path: &str) -> bool;
}

/// Declarative form of a glob query, as written in trigger definitions.
///
/// ```toml
/// [trigger.rebuild.expression]
/// include = ["src/**/*.rs"]
/// exclude = ["src/**/generated/**"]
/// ```
///
/// An empty `include` list matches everything (minus excludes).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl QuerySpec {
    pub fn compile(&self) -> Result<GlobQuery, TriggerConfigError> {
        let include = if self.include.is_empty() {
            None
        } else {
            Some(build_globset(&self.include)?)
        };
        let exclude = if self.exclude.is_empty() {
            None
        } else {
            Some(build_globset(&self.exclude)?)
        };
        Ok(GlobQuery { include, exclude })
    }
}

/// Compiled include/exclude glob sets.
#[derive(Debug)]
pub struct GlobQuery {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl PathMatcher for GlobQuery {
    fn matches(&self, rel_path: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(rel_path) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, TriggerConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).map_err(|source| TriggerConfigError::BadPattern {
            pattern: pat.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| TriggerConfigError::BadPattern {
        pattern: patterns.join(", "),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_and_exclude_combine() {
        let query = QuerySpec {
            include: vec!["src/**/*.rs".into()],
            exclude: vec!["src/**/tmp_*.rs".into()],
        }
        .compile()
        .unwrap();

        assert!(query.matches("src/main.rs"));
        assert!(query.matches("src/watch/backend.rs"));
        assert!(!query.matches("src/tmp_scratch.rs"));
        assert!(!query.matches("README.md"));
    }

    #[test]
    fn empty_include_matches_everything_except_excludes() {
        let query = QuerySpec {
            include: vec![],
            exclude: vec!["*.log".into()],
        }
        .compile()
        .unwrap();

        assert!(query.matches("anything/at/all.rs"));
        assert!(!query.matches("out.log"));
    }

    #[test]
    fn invalid_glob_is_a_configuration_error() {
        let err = QuerySpec {
            include: vec!["src/[".into()],
            exclude: vec![],
        }
        .compile()
        .unwrap_err();

        assert!(matches!(err, TriggerConfigError::BadPattern { .. }));
    }
}
