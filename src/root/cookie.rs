// src/root/cookie.rs

//! Cookie-file synchronization.
//!
//! `sync_to_now` gives a synchronous caller proof that the watcher has
//! observed everything up to "now": it drops a uniquely named sentinel file
//! into the active cookie directory, waits for the watcher to report that
//! very file, and deletes it. If the round-trip is not observed within the
//! timeout the caller gets an error while the watch itself stays alive.
//!
//! The cookie directory defaults to the watch root and may be relocated once
//! into a VCS directory during ignore application (see `Root::apply_ignores`).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::errors::SyncError;

/// File-name prefix of every sentinel this process creates.
pub const COOKIE_PREFIX: &str = ".vigil-cookie-";

#[derive(Debug, Clone, PartialEq)]
enum WaitState {
    Pending,
    Observed,
    Aborted(String),
}

struct CookieWait {
    state: Mutex<WaitState>,
    cond: Condvar,
}

/// Creates and observes sentinel files to implement synchronous flushes.
pub struct CookieSync {
    cookie_dir: Mutex<PathBuf>,
    serial: AtomicU64,
    waits: Mutex<HashMap<PathBuf, Arc<CookieWait>>>,
}

impl CookieSync {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            cookie_dir: Mutex::new(root_path.into()),
            serial: AtomicU64::new(1),
            waits: Mutex::new(HashMap::new()),
        }
    }

    pub fn cookie_dir(&self) -> PathBuf {
        self.cookie_dir.lock().clone()
    }

    /// Relocate the active cookie directory. Called during ignore
    /// application, before any `sync_to_now` that depends on the new
    /// location; sentinels written to a stale directory would never surface.
    pub fn set_cookie_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        debug!(dir = %dir.display(), "cookie directory relocated");
        *self.cookie_dir.lock() = dir;
    }

    /// Perform one cookie round-trip, blocking for at most `timeout`.
    pub fn sync_to_now(&self, timeout: Duration) -> Result<(), SyncError> {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let name = format!("{COOKIE_PREFIX}{}-{serial}", std::process::id());
        let cookie = self.cookie_dir().join(name);

        // Register the waiter before the file exists so the observation
        // cannot race past us.
        let wait = Arc::new(CookieWait {
            state: Mutex::new(WaitState::Pending),
            cond: Condvar::new(),
        });
        self.waits.lock().insert(cookie.clone(), Arc::clone(&wait));

        if let Err(source) = fs::File::create(&cookie) {
            self.waits.lock().remove(&cookie);
            return Err(SyncError::CreateFailed { cookie, source });
        }
        debug!(cookie = %cookie.display(), "cookie created, waiting for observation");

        let deadline = Instant::now() + timeout;
        let mut state = wait.state.lock();
        while *state == WaitState::Pending {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            wait.cond.wait_for(&mut state, deadline - now);
        }
        let outcome = state.clone();
        drop(state);

        self.waits.lock().remove(&cookie);
        let _ = fs::remove_file(&cookie);

        match outcome {
            WaitState::Observed => Ok(()),
            WaitState::Aborted(reason) => Err(SyncError::RootCancelled { reason }),
            WaitState::Pending => Err(SyncError::Timeout {
                cookie,
                waited: timeout,
            }),
        }
    }

    /// True if `path` looks like one of our sentinels.
    pub fn is_cookie_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(COOKIE_PREFIX))
    }

    /// Called by the root's processing loop for every observed path; wakes
    /// the matching waiter, if any.
    pub fn notify_cookie(&self, path: &Path) {
        let wait = self.waits.lock().get(path).cloned();
        if let Some(wait) = wait {
            debug!(cookie = %path.display(), "cookie observed");
            *wait.state.lock() = WaitState::Observed;
            wait.cond.notify_all();
        }
    }

    /// Fail every in-flight `sync_to_now` immediately. Called on root
    /// cancellation so no synchronizer stays blocked on a dead watch.
    pub fn abort_all(&self, reason: &str) {
        let waits = self.waits.lock();
        for wait in waits.values() {
            let mut state = wait.state.lock();
            if *state == WaitState::Pending {
                *state = WaitState::Aborted(reason.to_string());
            }
            wait.cond.notify_all();
        }
    }
}
