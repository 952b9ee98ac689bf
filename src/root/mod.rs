// src/root/mod.rs

//! The watched root.
//!
//! A `Root` owns one watcher backend, the pending-change collection, the
//! ignore set, the cookie synchronizer and the trigger map, and drives the
//! settle timer and tick counter that give everything else a consistent
//! notion of "generation of change".
//!
//! State machine: `Idle -> Crawling -> Settling -> Settled -> Idle`,
//! re-entrant (new pending work while Settled moves back to Settling), with
//! a terminal `Cancelled` reached on unrecoverable watcher failure or
//! explicit shutdown.

pub mod cookie;
pub mod publish;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::errors::SyncError;
use crate::ignore::IgnoreSet;
use crate::pending::{PendingCollection, PendingFlags};
use crate::root::cookie::CookieSync;
use crate::root::publish::{Publisher, Subscriber, UnilateralEvent};
use crate::trigger::TriggerCommand;
use crate::watch::{WatcherBackend, WatcherRegistry};

pub use cookie::COOKIE_PREFIX;

/// Each root gets a number that uniquely identifies it within the process,
/// so clock strings stay unambiguous if a root is removed and re-added.
static NEXT_ROOT_NUMBER: AtomicU64 = AtomicU64::new(1);

/// Default quiet interval before a settled event is emitted.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(20);

/// Upper bound on one wait so the loop stays responsive to cancellation
/// even with no filesystem activity.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Bound on the in-memory change log.
const CHANGE_LOG_LIMIT: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
    Idle,
    Crawling,
    Settling,
    Settled,
    Cancelled,
}

/// Construction options for a root.
#[derive(Debug, Clone)]
pub struct RootOptions {
    pub settle: Duration,
    /// Requested backend name; `None` or `"auto"` selects by priority.
    pub watcher: Option<String>,
    /// Fully-ignored directories, relative to the root.
    pub ignore_dirs: Vec<String>,
    /// VCS directory names eligible to host the cookie directory.
    pub ignore_vcs: Vec<String>,
    /// Daemon socket path exported to trigger children as `VIGIL_SOCK`.
    pub sock_path: Option<PathBuf>,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            watcher: None,
            ignore_dirs: Vec::new(),
            ignore_vcs: vec![".git".into(), ".svn".into(), ".hg".into()],
            sock_path: None,
        }
    }
}

/// One matched file record, as handed to trigger commands.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileRecord {
    pub name: String,
    pub exists: bool,
}

#[derive(Debug, Clone)]
struct ChangeRecord {
    tick: u64,
    name: String,
    exists: bool,
}

#[derive(Debug, Default)]
struct RecrawlInfo {
    should_recrawl: bool,
    last_reason: Option<String>,
    count: u64,
}

pub struct Root {
    path: PathBuf,
    number: u64,
    settle: Duration,
    sock_path: Option<PathBuf>,

    ignore: IgnoreSet,
    cookies: CookieSync,
    pending: PendingCollection,
    watcher: Arc<dyn WatcherBackend>,
    publisher: Publisher,

    pub(crate) triggers: Mutex<BTreeMap<String, TriggerCommand>>,

    tick: AtomicU64,
    state: Mutex<RootState>,
    cancelled: AtomicBool,
    failure_reason: Mutex<Option<String>>,
    recrawl: Mutex<RecrawlInfo>,
    changes: Mutex<Vec<ChangeRecord>>,

    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Root {
    /// Resolve the root path, apply ignore configuration (relocating the
    /// cookie directory if a VCS directory is present), and select a
    /// watcher backend. Nothing is watched until [`start`](Self::start).
    pub fn new(
        path: impl Into<PathBuf>,
        options: RootOptions,
        registry: &WatcherRegistry,
    ) -> Result<Arc<Self>> {
        let path = path.into();
        let path = path
            .canonicalize()
            .with_context(|| format!("resolving watch root {}", path.display()))?;
        // Fail early if the root is not an enumerable directory.
        std::fs::read_dir(&path)
            .with_context(|| format!("failed to opendir {}", path.display()))?;

        let cookies = CookieSync::new(&path);
        let mut ignore = IgnoreSet::new();

        for dir in &options.ignore_dirs {
            let full = path.join(dir);
            debug!(dir = %full.display(), "ignoring recursively");
            ignore.add(full, false);
        }

        apply_vcs_ignores(&path, &options.ignore_vcs, &mut ignore, &cookies);

        let watcher = registry
            .init_watcher(options.watcher.as_deref(), &path)
            .with_context(|| format!("selecting watcher for {}", path.display()))?;

        Ok(Arc::new(Self {
            path,
            number: NEXT_ROOT_NUMBER.fetch_add(1, Ordering::Relaxed),
            settle: options.settle,
            sock_path: options.sock_path,
            ignore,
            cookies,
            pending: PendingCollection::new(),
            watcher,
            publisher: Publisher::new(),
            triggers: Mutex::new(BTreeMap::new()),
            tick: AtomicU64::new(0),
            state: Mutex::new(RootState::Idle),
            cancelled: AtomicBool::new(false),
            failure_reason: Mutex::new(None),
            recrawl: Mutex::new(RecrawlInfo::default()),
            changes: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn ignore(&self) -> &IgnoreSet {
        &self.ignore
    }

    pub fn cookies(&self) -> &CookieSync {
        &self.cookies
    }

    pub fn sock_path(&self) -> Option<&Path> {
        self.sock_path.as_deref()
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub(crate) fn bump_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current_clock(&self) -> String {
        format!("c:{}:{}", self.number, self.tick())
    }

    pub fn state(&self) -> RootState {
        *self.state.lock()
    }

    fn set_state(&self, state: RootState) {
        let mut current = self.state.lock();
        if *current != RootState::Cancelled {
            *current = state;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// The recorded reason for a fatal failure, if any. This is how a
    /// long-dead watch is observable to administrative callers.
    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.lock().clone()
    }

    pub fn recrawl_count(&self) -> u64 {
        self.recrawl.lock().count
    }

    /// Subscribe to the root's unilateral event stream (settled and
    /// cancelled notices).
    pub fn subscribe(&self) -> Subscriber {
        self.publisher.subscribe()
    }

    /// Establish the watch and launch the processing loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if !self.watcher.start(self) {
            let reason = self
                .failure_reason()
                .unwrap_or_else(|| "watcher failed to start".to_string());
            return Err(anyhow!("{}: {reason}", self.path.display()));
        }

        let root = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("vigil-root {}", self.path.display()))
            .spawn(move || root.run_loop())
            .context("spawning root processing thread")?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Block until the processing loop exits (i.e. until cancellation).
    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Block until a cookie created now has been observed by the watcher.
    pub fn sync_to_now(&self, timeout: Duration) -> Result<(), SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::RootCancelled {
                reason: self
                    .failure_reason()
                    .unwrap_or_else(|| "root cancelled".to_string()),
            });
        }
        self.cookies.sync_to_now(timeout)
    }

    /// Ask the processing loop to re-enumerate the tree. The first request
    /// per episode records the reason.
    pub fn schedule_recrawl(&self, why: &str) {
        {
            let mut info = self.recrawl.lock();
            if !info.should_recrawl {
                info.last_reason = Some(format!("{}: {why}", self.path.display()));
                error!(root = %self.path.display(), why, "scheduling a tree recrawl");
            }
            info.should_recrawl = true;
        }
        self.signal_threads();
    }

    fn take_recrawl_request(&self) -> Option<String> {
        let mut info = self.recrawl.lock();
        if info.should_recrawl {
            info.should_recrawl = false;
            info.count += 1;
            info.last_reason.take().or_else(|| Some(String::new()))
        } else {
            None
        }
    }

    pub fn signal_threads(&self) {
        self.watcher.signal_threads();
    }

    /// Record a failure reason (first writer wins) and cancel the watch.
    pub fn cancel_with_reason(&self, reason: &str) {
        {
            let mut failure = self.failure_reason.lock();
            if failure.is_none() {
                *failure = Some(reason.to_string());
            }
        }
        self.cancel();
    }

    /// Cancel the watch. Idempotent; returns whether this call did the
    /// cancellation. Unblocks every thread waiting on this root and stops
    /// all triggers before returning.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.state.lock() = RootState::Cancelled;
        let reason = self
            .failure_reason()
            .unwrap_or_else(|| "root cancelled".to_string());
        info!(root = %self.path.display(), reason, "marked cancelled");

        self.publisher.enqueue(UnilateralEvent {
            root: self.path.clone(),
            tick: self.tick(),
            clock: self.current_clock(),
            settled: false,
            canceled: true,
        });

        self.signal_threads();
        self.cookies.abort_all(&reason);

        // Steal the map so the lock is not held across the joins.
        let stopped: Vec<TriggerCommand> = {
            let mut map = self.triggers.lock();
            std::mem::take(&mut *map).into_values().collect()
        };
        for mut trigger in stopped {
            trigger.stop();
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn record_change(&self, name: &str) {
        let tick = self.tick();
        self.changes.lock().push(ChangeRecord {
            tick,
            name: name.to_string(),
            exists: true,
        });
    }

    /// All distinct paths changed since `since_tick`, in first-observed
    /// order, each carrying its latest existence state.
    pub fn changes_since(&self, since_tick: u64) -> Vec<FileRecord> {
        let changes = self.changes.lock();
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<&str, bool> = HashMap::new();

        for record in changes.iter().filter(|r| r.tick > since_tick) {
            if !latest.contains_key(record.name.as_str()) {
                order.push(record.name.clone());
            }
            latest.insert(record.name.as_str(), record.exists);
        }

        order
            .into_iter()
            .map(|name| {
                let exists = latest[name.as_str()];
                FileRecord { name, exists }
            })
            .collect()
    }

    // ---- processing loop -------------------------------------------------

    fn run_loop(self: Arc<Self>) {
        info!(root = %self.path.display(), watcher = self.watcher.name(), "root loop started");

        self.set_state(RootState::Crawling);
        self.crawl();
        self.set_state(RootState::Idle);

        let mut settle = SettleTracker::new(self.settle);

        while !self.is_cancelled() {
            if let Some(reason) = self.take_recrawl_request() {
                info!(root = %self.path.display(), reason, "recrawling");
                // The whole-tree entry absorbs any pending descendants from
                // the event storm that forced the recrawl.
                self.pending.add(
                    self.path.clone(),
                    Instant::now(),
                    PendingFlags::RECURSIVE | PendingFlags::CRAWL_ONLY,
                );
                self.set_state(RootState::Crawling);
                self.crawl();
                self.set_state(if settle.is_settling() {
                    RootState::Settling
                } else {
                    RootState::Idle
                });
            }

            self.watcher.wait_notify(settle.wait_timeout(Instant::now()));
            if self.is_cancelled() {
                break;
            }

            if self.watcher.consume_notify(&self, &self.pending) {
                self.bump_tick();
            }

            let drained = self.pending.drain();
            if !drained.is_empty() {
                self.process_changes(drained);
                settle.record_activity(Instant::now());
                self.set_state(RootState::Settling);
            } else if settle.check_settled(Instant::now()) {
                self.emit_settled();
                self.set_state(RootState::Settled);
            }
        }

        info!(root = %self.path.display(), "root loop done");
    }

    fn process_changes(&self, drained: Vec<crate::pending::PendingChange>) {
        let tick = self.tick();
        let mut changes = self.changes.lock();

        for change in drained {
            if self.cookies.is_cookie_path(&change.path) {
                self.cookies.notify_cookie(&change.path);
                continue;
            }
            // Enumeration work, not a content change.
            if change.flags.contains(PendingFlags::CRAWL_ONLY) {
                continue;
            }
            let Some(name) = relative_str(&self.path, &change.path) else {
                warn!(
                    path = %change.path.display(),
                    root = %self.path.display(),
                    "could not relativize changed path"
                );
                continue;
            };
            let exists = change.path.symlink_metadata().is_ok();
            debug!(name, exists, tick, "observed change");
            changes.push(ChangeRecord { tick, name, exists });
        }

        if changes.len() > CHANGE_LOG_LIMIT {
            let excess = changes.len() - CHANGE_LOG_LIMIT;
            changes.drain(..excess);
        }
    }

    fn emit_settled(&self) {
        let tick = self.tick();
        debug!(root = %self.path.display(), tick, "settled");
        self.publisher.enqueue(UnilateralEvent {
            root: self.path.clone(),
            tick,
            clock: self.current_clock(),
            settled: true,
            canceled: false,
        });
    }

    /// Full-tree enumeration. Establishes per-directory handles through the
    /// backend and skips ignored subtrees; open errors on subdirectories
    /// are logged and skipped rather than failing the crawl.
    fn crawl(&self) {
        let started = Instant::now();
        let mut dirs = 0u64;
        let mut stack = vec![self.path.clone()];

        while let Some(dir) = stack.pop() {
            if self.is_cancelled() {
                return;
            }
            if dir != self.path && self.ignore.is_ignored(&dir) {
                continue;
            }
            let entries = match self.watcher.start_watch_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "crawl: cannot enumerate");
                    continue;
                }
            };
            dirs += 1;
            for entry in entries.flatten() {
                if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                    stack.push(entry.path());
                }
            }
        }

        debug!(
            root = %self.path.display(),
            dirs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "crawl complete"
        );
    }
}

fn apply_vcs_ignores(
    root_path: &Path,
    ignore_vcs: &[String],
    ignore: &mut IgnoreSet,
    cookies: &CookieSync,
) {
    for name in ignore_vcs {
        let full = root_path.join(name);

        // Completely ignored already: nothing more to do for this prefix.
        if ignore.is_ignore_dir(&full) {
            continue;
        }
        ignore.add(full.clone(), true);

        // While we're at it, see if this is where query cookies should live.
        // Only relocate out of the root itself, and only into a real
        // directory; the relocation is monotonic per application pass.
        if cookies.cookie_dir() == root_path
            && full
                .symlink_metadata()
                .is_ok_and(|meta| meta.is_dir())
        {
            cookies.set_cookie_dir(full);
        }
    }
}

/// Convert a path into a string relative to `root`, with forward slashes.
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Debounce bookkeeping for the settle timer.
///
/// Every drained batch restarts the quiet interval; `check_settled` reports
/// true exactly once per quiescent period.
struct SettleTracker {
    settle: Duration,
    last_activity: Option<Instant>,
}

impl SettleTracker {
    fn new(settle: Duration) -> Self {
        Self {
            settle,
            last_activity: None,
        }
    }

    fn record_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    fn is_settling(&self) -> bool {
        self.last_activity.is_some()
    }

    fn check_settled(&mut self, now: Instant) -> bool {
        match self.last_activity {
            Some(at) if now.duration_since(at) >= self.settle => {
                self.last_activity = None;
                true
            }
            _ => false,
        }
    }

    fn wait_timeout(&self, now: Instant) -> Duration {
        match self.last_activity {
            Some(at) => {
                let deadline = at + self.settle;
                deadline
                    .saturating_duration_since(now)
                    .max(Duration::from_millis(1))
                    .min(IDLE_WAIT)
            }
            None => IDLE_WAIT,
        }
    }
}
