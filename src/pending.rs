// src/pending.rs

//! The pending-change collection.
//!
//! Watcher backends (producers) and the root's processing loop (the single
//! consumer) meet here. The collection deduplicates by path, merges flags,
//! and preserves insertion order; a recursive entry for a directory absorbs
//! pending entries for anything beneath it.
//!
//! The internal lock is the only contended lock on the hot event path, so
//! producers do O(1) amortized work per event while holding it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bitflags::bitflags;
use parking_lot::Mutex;

bitflags! {
    /// How a pending change was discovered and how it should be processed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PendingFlags: u8 {
        /// Reported by the OS notification mechanism (vs. found by a crawl).
        const VIA_NOTIFY = 0b001;
        /// The whole subtree beneath this directory needs attention.
        const RECURSIVE = 0b010;
        /// Only re-enumerate; do not treat as a content change.
        const CRAWL_ONLY = 0b100;
    }
}

/// One recorded filesystem path believed to have changed.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub path: PathBuf,
    pub observed_at: Instant,
    pub flags: PendingFlags,
}

#[derive(Default)]
struct Inner {
    /// Insertion-ordered records; `index` maps path -> position here.
    items: Vec<PendingChange>,
    index: HashMap<PathBuf, usize>,
}

/// Thread-safe, deduplicating, insertion-ordered collection of pending
/// changes.
#[derive(Default)]
pub struct PendingCollection {
    inner: Mutex<Inner>,
}

impl PendingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a change record.
    ///
    /// Idempotent for repeated identical `(path, flags)` insertions. A path
    /// beneath an already-pending recursive directory is absorbed into that
    /// entry; a recursive directory insertion prunes pending entries for its
    /// descendants.
    pub fn add(&self, path: impl Into<PathBuf>, now: Instant, flags: PendingFlags) {
        let path = path.into();
        let mut inner = self.inner.lock();

        if let Some(&pos) = inner.index.get(&path) {
            inner.items[pos].flags |= flags;
            return;
        }

        // Absorbed by a pending recursive ancestor? Walking the ancestor
        // chain against the index keeps this proportional to path depth,
        // not to the number of pending entries.
        let absorbed = path.ancestors().skip(1).any(|ancestor| {
            inner
                .index
                .get(ancestor)
                .is_some_and(|&pos| inner.items[pos].flags.contains(PendingFlags::RECURSIVE))
        });
        if absorbed {
            return;
        }

        if flags.contains(PendingFlags::RECURSIVE) {
            Self::prune_descendants(&mut inner, &path);
        }

        let pos = inner.items.len();
        inner.items.push(PendingChange {
            path: path.clone(),
            observed_at: now,
            flags,
        });
        inner.index.insert(path, pos);
    }

    fn prune_descendants(inner: &mut Inner, dir: &Path) {
        let before = inner.items.len();
        inner
            .items
            .retain(|item| item.path == *dir || !item.path.starts_with(dir));
        if inner.items.len() != before {
            inner.index.clear();
            let index: Vec<(PathBuf, usize)> = inner
                .items
                .iter()
                .enumerate()
                .map(|(pos, item)| (item.path.clone(), pos))
                .collect();
            inner.index.extend(index);
        }
    }

    /// Atomically empty the collection and return its contents.
    ///
    /// Order is insertion order, except that a directory's own change is
    /// placed before its descendants' changes so a consumer can crawl the
    /// batch in one pass.
    pub fn drain(&self) -> Vec<PendingChange> {
        let mut inner = self.inner.lock();
        let items = std::mem::take(&mut inner.items);
        inner.index.clear();
        drop(inner);

        // Re-place each entry before any already-placed descendant. The
        // batches are small, so the quadratic scan is not a concern.
        let mut ordered: Vec<PendingChange> = Vec::with_capacity(items.len());
        for item in items {
            let insert_at = ordered
                .iter()
                .position(|placed| {
                    placed.path != item.path && placed.path.starts_with(&item.path)
                })
                .unwrap_or(ordered.len());
            ordered.insert(insert_at, item);
        }
        ordered
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}
