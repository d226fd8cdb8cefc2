//! Live reloading: bulk loading, change routing, and the reconciliation of
//! reloaded script units against the live namespace tree.

pub mod dispatcher;
pub mod loader;
pub mod reconciler;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use dispatcher::{ChangeDispatcher, ChangeKind};
pub use loader::DirectoryLoader;
pub use reconciler::{LeakEntry, Reconciler};
pub use watcher::ScriptWatcher;

use crate::script::ScriptUnit;

/// Compatibility hook consulted before a reload is applied. Which shape
/// changes should block a reload (a name turning from class to non-class,
/// say) is a host policy decision; the runtime only guarantees the hook
/// point exists.
pub trait ReloadPolicy {
    fn is_compatible(&self, old: &ScriptUnit, new: &ScriptUnit) -> bool;
}

/// The default policy: every reload is accepted.
pub struct AlwaysCompatible;

impl ReloadPolicy for AlwaysCompatible {
    fn is_compatible(&self, _old: &ScriptUnit, _new: &ScriptUnit) -> bool {
        true
    }
}
