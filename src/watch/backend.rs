// src/watch/backend.rs

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::errors::WatcherError;
use crate::pending::PendingCollection;
use crate::root::Root;

/// A pluggable OS-notification backend.
///
/// One implementation exists per notification facility; the root is
/// backend-agnostic and talks to whichever one the registry selected.
///
/// Contract notes:
/// - `start` must establish the underlying OS watch *before* reporting
///   ready. A change landing between the initial crawl and watch
///   establishment would otherwise be silently lost.
/// - Backends buffer events into an internal queue on their own reader
///   thread and only drain that queue, under a short-lived lock, inside
///   `consume_notify`. A backend must never deliver events while holding a
///   lock a consumer also needs.
pub trait WatcherBackend: Send + Sync {
    /// What's it called?
    fn name(&self) -> &'static str;

    /// Spin up the backend's reader thread. Returns false (after marking
    /// the root failed) if the backend cannot initialize within the bounded
    /// startup window.
    fn start(&self, root: &Arc<Root>) -> bool;

    /// Open a directory for enumeration during a crawl.
    fn start_watch_dir(&self, path: &Path) -> Result<fs::ReadDir, WatcherError> {
        fs::read_dir(path).map_err(|source| WatcherError::Open {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Block until buffered items exist or `timeout` elapses; returns
    /// whether anything is buffered.
    fn wait_notify(&self, timeout: Duration) -> bool;

    /// Drain all currently-buffered events into `coll`, applying the root's
    /// ignore set. Returns whether anything was added. Does not block.
    fn consume_notify(&self, root: &Root, coll: &PendingCollection) -> bool;

    /// Wake any blocked reader/waiter unconditionally. Used at shutdown;
    /// does not join threads.
    fn signal_threads(&self);
}

impl std::fmt::Debug for dyn WatcherBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherBackend")
            .field("name", &self.name())
            .finish()
    }
}

type BackendFactory = fn(&Path) -> Result<Arc<dyn WatcherBackend>, WatcherError>;

struct RegistryEntry {
    name: &'static str,
    priority: i32,
    factory: BackendFactory,
}

/// Name -> factory table for watcher backends.
///
/// Selection order: an explicitly requested backend is tried first, then the
/// remaining entries from highest priority down, accumulating failure
/// reasons so the final error explains every attempt.
pub struct WatcherRegistry {
    entries: Vec<RegistryEntry>,
}

impl WatcherRegistry {
    /// Registry preloaded with the built-in backends: the platform's
    /// recommended notification facility, plus a polling fallback.
    pub fn with_builtin() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
        };
        registry.register(
            crate::watch::notify_backend::RECOMMENDED_NAME,
            10,
            crate::watch::notify_backend::recommended_factory,
        );
        registry.register(
            crate::watch::notify_backend::POLL_NAME,
            1,
            crate::watch::notify_backend::poll_factory,
        );
        registry
    }

    pub fn register(&mut self, name: &'static str, priority: i32, factory: BackendFactory) {
        self.entries.push(RegistryEntry {
            name,
            priority,
            factory,
        });
    }

    /// Locate and construct the appropriate backend for `path`.
    ///
    /// `requested` of `None` or `Some("auto")` means pure auto-selection.
    pub fn init_watcher(
        &self,
        requested: Option<&str>,
        path: &Path,
    ) -> Result<Arc<dyn WatcherBackend>, WatcherError> {
        let mut reasons = String::new();
        let requested = requested.filter(|name| *name != "auto");

        if let Some(name) = requested {
            match self.entries.iter().find(|e| e.name == name) {
                None => {
                    reasons.push_str(&format!("no watcher named {name}. "));
                }
                Some(entry) => match (entry.factory)(path) {
                    Ok(watcher) => {
                        info!(watcher = watcher.name(), requested = name, "selected watcher");
                        return Ok(watcher);
                    }
                    Err(e) => reasons.push_str(&format!("{name}: {e}. ")),
                },
            }
        }

        let mut remaining: Vec<&RegistryEntry> = self
            .entries
            .iter()
            .filter(|e| Some(e.name) != requested)
            .collect();
        remaining.sort_by_key(|e| std::cmp::Reverse(e.priority));

        for entry in remaining {
            match (entry.factory)(path) {
                Ok(watcher) => {
                    info!(watcher = watcher.name(), "selected watcher by auto-detection");
                    return Ok(watcher);
                }
                Err(e) => reasons.push_str(&format!("{}: {e}. ", entry.name)),
            }
        }

        Err(WatcherError::NoUsableBackend { reasons })
    }
}
