//! Live code reloading for a tree of script files.
//!
//! A directory of `.ember` scripts is compiled, executed and installed into a
//! dotted namespace tree mirroring the directory layout. While the session
//! runs, a file watcher picks up edits; changed files are recompiled,
//! re-executed and reconciled against the installed state so that live
//! objects keep working: classes keep their identity and are mutated in
//! place, functions are rebound over surviving scopes, and removed names are
//! retained (and tracked) rather than torn out from under their users.
//!
//! The pieces compose bottom-up:
//! - [`script`] holds the language itself: lexer, parser, interpreter, and
//!   the per-file [`ScriptUnit`].
//! - [`namespace`] is the shared tree scripts install their exports into.
//! - [`reload`] ties the two together: [`reload::DirectoryLoader`] for bulk
//!   loads and per-file reloads, [`reload::Reconciler`] for the merge,
//!   [`reload::ChangeDispatcher`] and [`reload::ScriptWatcher`] for routing
//!   filesystem events.

pub mod config;
pub mod error;
pub mod namespace;
pub mod reload;
pub mod script;

pub use config::RuntimeConfig;
pub use error::{ReloadError, ReloadResult};
pub use namespace::{NamespaceNode, NamespaceRegistry};
pub use reload::{
    AlwaysCompatible, ChangeDispatcher, ChangeKind, DirectoryLoader, Reconciler, ReloadPolicy,
    ScriptWatcher,
};
pub use script::{CompileError, Interp, ScriptError, ScriptUnit, Value};
