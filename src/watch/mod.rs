// src/watch/mod.rs

//! The pluggable watcher layer.
//!
//! This module turns OS-specific notification mechanisms into a uniform
//! event stream:
//!
//! - [`backend`] defines the `WatcherBackend` contract and the name-keyed
//!   registry that selects an implementation at startup.
//! - [`notify_backend`] is the reference implementation over the `notify`
//!   crate, registered both as the platform's recommended facility and as a
//!   polling fallback.
//!
//! It does **not** know about settling or triggers; it only deposits
//! discovered paths into the root's `PendingCollection`.

pub mod backend;
pub mod notify_backend;

pub use backend::{WatcherBackend, WatcherRegistry};
