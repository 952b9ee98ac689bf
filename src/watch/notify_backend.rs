// src/watch/notify_backend.rs

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use notify::{Config, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::errors::WatcherError;
use crate::pending::{PendingCollection, PendingFlags};
use crate::root::Root;
use crate::watch::backend::WatcherBackend;

pub const RECOMMENDED_NAME: &str = "notify";
pub const POLL_NAME: &str = "poll";

/// How long `start` waits for the reader thread to establish the OS watch.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
enum BackendKind {
    Recommended,
    Poll,
}

#[derive(Debug, Clone, PartialEq)]
enum StartupState {
    NotStarted,
    Ready,
    Failed(String),
}

struct Inner {
    kind: BackendKind,
    root_path: PathBuf,
    /// Paths reported by the OS, buffered by the reader thread until the
    /// root's loop drains them via `consume_notify`.
    changed: Mutex<VecDeque<PathBuf>>,
    cond: Condvar,
    startup: Mutex<StartupState>,
    startup_cond: Condvar,
    ping_tx: Sender<()>,
    ping_rx: Receiver<()>,
}

/// Watcher backend built on the `notify` crate.
///
/// Registered twice: once over the platform's recommended facility
/// (inotify / FSEvents / ReadDirectoryChangesW) and once over the polling
/// fallback, which is slower but works on filesystems the native facility
/// cannot watch.
pub struct NotifyBackend {
    inner: Arc<Inner>,
}

pub fn recommended_factory(path: &Path) -> Result<Arc<dyn WatcherBackend>, WatcherError> {
    Ok(Arc::new(NotifyBackend::new(BackendKind::Recommended, path)))
}

pub fn poll_factory(path: &Path) -> Result<Arc<dyn WatcherBackend>, WatcherError> {
    Ok(Arc::new(NotifyBackend::new(BackendKind::Poll, path)))
}

impl NotifyBackend {
    fn new(kind: BackendKind, root_path: &Path) -> Self {
        let (ping_tx, ping_rx) = unbounded();
        Self {
            inner: Arc::new(Inner {
                kind,
                root_path: root_path.to_path_buf(),
                changed: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
                startup: Mutex::new(StartupState::NotStarted),
                startup_cond: Condvar::new(),
                ping_tx,
                ping_rx,
            }),
        }
    }
}

impl Inner {
    fn set_startup(&self, state: StartupState) {
        *self.startup.lock() = state;
        self.startup_cond.notify_all();
    }

    fn buffer_event(&self, root: &Root, event: Event) {
        if event.need_rescan() {
            root.schedule_recrawl("notification backend flagged a rescan");
        }
        if event.paths.is_empty() {
            return;
        }
        let mut changed = self.changed.lock();
        for path in event.paths {
            debug!(path = %path.display(), "buffered notification");
            changed.push_back(path);
        }
        self.cond.notify_all();
    }

    /// Returns whether the reader loop should keep running.
    fn handle_error(&self, root: &Root, err: notify::Error) -> bool {
        use notify::ErrorKind;
        match err.kind {
            // The watched entry moved under us; a recrawl re-establishes
            // a coherent picture without giving up the watch.
            ErrorKind::PathNotFound | ErrorKind::WatchNotFound => {
                warn!(error = %err, "recoverable watch error, scheduling recrawl");
                root.schedule_recrawl(&format!("watch error: {err}"));
                true
            }
            _ => {
                error!(error = %err, "fatal watch error, cancelling root");
                root.cancel_with_reason(&format!("watch error: {err}"));
                false
            }
        }
    }

    fn read_changes_thread(self: Arc<Self>, root: Arc<Root>) {
        let (event_tx, event_rx) = unbounded::<notify::Result<Event>>();
        let handler = move |res: notify::Result<Event>| {
            // Runs on notify's own callback thread; hand off immediately so
            // no consumer-visible lock is held while the OS delivers.
            let _ = event_tx.send(res);
        };

        let mut watcher: Box<dyn Watcher + Send> = match self.create_watcher(handler) {
            Ok(w) => w,
            Err(e) => {
                let reason = format!("failed to initialize {}: {e}", self.backend_name());
                self.set_startup(StartupState::Failed(reason.clone()));
                root.cancel_with_reason(&reason);
                return;
            }
        };

        if let Err(e) = watcher.watch(&self.root_path, RecursiveMode::Recursive) {
            let reason = format!(
                "failed to watch {}: {e}",
                self.root_path.display()
            );
            self.set_startup(StartupState::Failed(reason.clone()));
            root.cancel_with_reason(&reason);
            return;
        }

        // Signal readiness only now: the OS watch is established, so a
        // change arriving after the initial crawl cannot be lost.
        debug!(root = %self.root_path.display(), "watch established, signalling ready");
        self.set_startup(StartupState::Ready);

        while !root.is_cancelled() {
            select! {
                recv(self.ping_rx) -> _ => {
                    if root.is_cancelled() {
                        debug!("reader thread signalled for shutdown");
                        break;
                    }
                    // Recrawl scheduling pings us too; the OS watch stays up.
                    debug!("reader thread pinged, staying subscribed");
                }
                recv(event_rx) -> msg => match msg {
                    Ok(Ok(event)) => self.buffer_event(&root, event),
                    Ok(Err(err)) => {
                        if !self.handle_error(&root, err) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                default(Duration::from_secs(10)) => {}
            }
        }

        drop(watcher);
        debug!(root = %self.root_path.display(), "reader thread done");
    }

    fn create_watcher<F>(&self, handler: F) -> notify::Result<Box<dyn Watcher + Send>>
    where
        F: FnMut(notify::Result<Event>) + Send + 'static,
    {
        match self.kind {
            BackendKind::Recommended => Ok(Box::new(RecommendedWatcher::new(
                handler,
                Config::default(),
            )?)),
            BackendKind::Poll => Ok(Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(POLL_INTERVAL),
            )?)),
        }
    }

    fn backend_name(&self) -> &'static str {
        match self.kind {
            BackendKind::Recommended => RECOMMENDED_NAME,
            BackendKind::Poll => POLL_NAME,
        }
    }
}

impl WatcherBackend for NotifyBackend {
    fn name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn start(&self, root: &Arc<Root>) -> bool {
        let inner = Arc::clone(&self.inner);
        let thread_root = Arc::clone(root);
        let thread_name = format!("vigil-read {}", inner.root_path.display());

        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || inner.read_changes_thread(thread_root));
        if let Err(e) = spawned {
            root.cancel_with_reason(&format!("failed to spawn reader thread: {e}"));
            return false;
        }

        let deadline = Instant::now() + STARTUP_TIMEOUT;
        let mut state = self.inner.startup.lock();
        while *state == StartupState::NotStarted {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.inner
                .startup_cond
                .wait_for(&mut state, deadline - now);
        }

        match state.clone() {
            StartupState::Ready => true,
            StartupState::Failed(reason) => {
                error!(reason, "watcher backend failed to start");
                false
            }
            StartupState::NotStarted => {
                drop(state);
                root.cancel_with_reason("timed out waiting for watcher startup");
                false
            }
        }
    }

    fn wait_notify(&self, timeout: Duration) -> bool {
        let mut changed = self.inner.changed.lock();
        if changed.is_empty() {
            self.inner.cond.wait_for(&mut changed, timeout);
        }
        !changed.is_empty()
    }

    fn consume_notify(&self, root: &Root, coll: &PendingCollection) -> bool {
        let items: VecDeque<PathBuf> = {
            let mut changed = self.inner.changed.lock();
            std::mem::take(&mut *changed)
        };

        let now = Instant::now();
        let mut added = false;
        for path in items {
            if root.ignore().is_ignored(&path) {
                debug!(path = %path.display(), "dropping ignored notification");
                continue;
            }
            debug!(path = %path.display(), "add pending");
            coll.add(path, now, PendingFlags::VIA_NOTIFY);
            added = true;
        }
        added
    }

    fn signal_threads(&self) {
        let _ = self.inner.ping_tx.send(());
        self.inner.cond.notify_all();
    }
}
