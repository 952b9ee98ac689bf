// src/ignore.rs

//! Ignored path prefixes.
//!
//! An `IgnoreSet` holds the directory prefixes beneath which no events or
//! crawl work should happen. Entries come from two places:
//!
//! - explicit `ignore_dirs` configuration, and
//! - the VCS directory convention (`.git`, `.svn`, `.hg` by default).
//!
//! The distinction matters for the cookie directory: a VCS-ignored prefix is
//! still eligible to host query cookies, because VCS metadata directories are
//! reliable places to write sentinel files without disturbing user tooling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A set of ignored path prefixes, each flagged as VCS-derived or not.
#[derive(Debug, Default, Clone)]
pub struct IgnoreSet {
    entries: BTreeMap<PathBuf, IgnoreEntry>,
}

#[derive(Debug, Clone, Copy)]
struct IgnoreEntry {
    is_vcs_ignore: bool,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prefix to the ignore set. Re-adding an existing prefix keeps
    /// the stronger (non-VCS) classification.
    pub fn add(&mut self, prefix: impl Into<PathBuf>, is_vcs_ignore: bool) {
        let prefix = prefix.into();
        self.entries
            .entry(prefix)
            .and_modify(|e| e.is_vcs_ignore &= is_vcs_ignore)
            .or_insert(IgnoreEntry { is_vcs_ignore });
    }

    /// True if events and crawl work for `path` should be dropped.
    ///
    /// A fully-ignored prefix swallows its whole subtree. A VCS-ignored
    /// prefix swallows only paths deeper than its direct children: changes
    /// to the VCS directory itself and to files directly inside it still
    /// surface, which is what lets a cookie directory live there.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.entries.iter().any(|(prefix, entry)| {
            if !path.starts_with(prefix) {
                return false;
            }
            if !entry.is_vcs_ignore {
                return true;
            }
            path != prefix && path.parent() != Some(prefix)
        })
    }

    /// True if `path` is exactly a fully-ignored (non-VCS) directory.
    pub fn is_ignore_dir(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .is_some_and(|e| !e.is_vcs_ignore)
    }

    /// True if `path` is exactly a VCS-ignored directory.
    pub fn is_vcs_ignore_dir(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .is_some_and(|e| e.is_vcs_ignore)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all ignored prefixes.
    pub fn prefixes(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(|p| p.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtree_of_ignored_prefix_is_ignored() {
        let mut ignore = IgnoreSet::new();
        ignore.add("/repo/target", false);

        assert!(ignore.is_ignored(Path::new("/repo/target")));
        assert!(ignore.is_ignored(Path::new("/repo/target/debug/deps/foo.d")));
        assert!(!ignore.is_ignored(Path::new("/repo/src/main.rs")));
        assert!(!ignore.is_ignored(Path::new("/repo/target-other/file")));
    }

    #[test]
    fn vcs_prefix_lets_direct_children_through() {
        let mut ignore = IgnoreSet::new();
        ignore.add("/repo/.hg", true);

        assert!(!ignore.is_ignored(Path::new("/repo/.hg")));
        assert!(!ignore.is_ignored(Path::new("/repo/.hg/.vigil-cookie-42-1")));
        assert!(ignore.is_ignored(Path::new("/repo/.hg/store/data/foo.i")));
    }

    #[test]
    fn vcs_classification_is_tracked_per_prefix() {
        let mut ignore = IgnoreSet::new();
        ignore.add("/repo/.git", true);
        ignore.add("/repo/build", false);

        assert!(ignore.is_vcs_ignore_dir(Path::new("/repo/.git")));
        assert!(!ignore.is_ignore_dir(Path::new("/repo/.git")));
        assert!(ignore.is_ignore_dir(Path::new("/repo/build")));
        assert!(!ignore.is_vcs_ignore_dir(Path::new("/repo/build")));
    }

    #[test]
    fn readding_as_explicit_upgrades_vcs_entry() {
        let mut ignore = IgnoreSet::new();
        ignore.add("/repo/.hg", true);
        ignore.add("/repo/.hg", false);

        assert!(ignore.is_ignore_dir(Path::new("/repo/.hg")));
    }
}
