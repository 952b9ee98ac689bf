// src/trigger/mod.rs

//! Trigger commands: user-defined rules binding a query expression to a
//! command executed when matching changes settle.
//!
//! - [`def`] holds the declarative definition plus the pure validation
//!   helpers (stdin modes, redirection syntax).
//! - [`command`] is the runtime: one worker thread per trigger, subscribed
//!   to the root's settled events, managing the child process lifecycle.
//!
//! The administrative operations (register / delete / list) live here as
//! methods on [`Root`], guarding the trigger map with its own lock that is
//! never held across a spawn or a child wait.

pub mod command;
pub mod def;

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

use crate::root::Root;

pub use command::TriggerCommand;
pub use def::{Redirect, StdinSpec, StdinStyle, TriggerDefinition, parse_redirection};

/// Outcome of a trigger registration, as surfaced to administrative
/// callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDisposition {
    Created,
    Replaced,
    AlreadyDefined,
}

impl Root {
    /// Register (or re-register) a trigger.
    ///
    /// The definition is validated in full before anything is touched. A
    /// definition identical to the existing one under the same name is a
    /// no-op: the running instance and its run clock are preserved so the
    /// trigger does not immediately re-fire. A changed definition stops the
    /// old instance completely before the new one observes any event, and
    /// bumps the tick so the replacement is eligible to run now.
    ///
    /// A cancelled root refuses new triggers: its map has already been
    /// drained and stopped, so a late entry would never be stopped again.
    pub fn register_trigger(
        self: &Arc<Self>,
        def: TriggerDefinition,
    ) -> Result<TriggerDisposition> {
        let mut cmd = TriggerCommand::new(self, &def)?;

        let disposition = {
            let mut map = self.triggers.lock();

            // Checked under the map lock: cancel() flips the flag before it
            // steals the map, so we either land before the steal (and get
            // stopped with the rest) or see the flag here.
            if self.is_cancelled() {
                bail!(
                    "cannot register trigger '{}': root {} is cancelled",
                    def.name,
                    self.path().display()
                );
            }

            if let Some(old) = map.get(&def.name) {
                if *old.definition() == def {
                    // Same definition: don't touch anything, preserving the
                    // associated trigger clock.
                    return Ok(TriggerDisposition::AlreadyDefined);
                }
            }

            let disposition = match map.remove(&def.name) {
                Some(mut old) => {
                    old.stop();
                    TriggerDisposition::Replaced
                }
                None => TriggerDisposition::Created,
            };

            cmd.start(self);
            map.insert(def.name.clone(), cmd);
            disposition
        };

        // Force the trigger to be eligible to run now.
        self.bump_tick();
        info!(trigger = %def.name, ?disposition, "trigger registered");
        Ok(disposition)
    }

    /// Delete a trigger by name, stopping its thread synchronously before
    /// the entry is erased. Returns whether the trigger existed.
    pub fn delete_trigger(&self, name: &str) -> bool {
        let removed = self.triggers.lock().remove(name);
        match removed {
            Some(mut trigger) => {
                trigger.stop();
                info!(trigger = %name, "trigger deleted");
                true
            }
            None => false,
        }
    }

    /// All registered trigger definitions, in name order.
    pub fn list_triggers(&self) -> Vec<TriggerDefinition> {
        self.triggers
            .lock()
            .values()
            .map(|t| t.definition().clone())
            .collect()
    }
}
