//! Routing of external file-change events to the owning loader.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::reload::loader::DirectoryLoader;

/// What the watcher observed happening to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Deleted,
}

/// Owns the registered loaders and routes `(path, kind)` events to the one
/// whose root is the longest (case-insensitive) prefix of the path.
///
/// Only `Changed` events for already-known files trigger a reload. `Added`
/// and `Deleted` are accepted as routable but intentionally ignored here:
/// there is no safe, general policy for loading brand-new files or unloading
/// live ones mid-session, so that decision belongs to the surrounding
/// system.
pub struct ChangeDispatcher {
    loaders: RefCell<Vec<Rc<DirectoryLoader>>>,
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        ChangeDispatcher {
            loaders: RefCell::new(Vec::new()),
        }
    }

    pub fn add_directory(&self, loader: Rc<DirectoryLoader>) {
        log::info!("dispatching changes under {}", loader.root().display());
        self.loaders.borrow_mut().push(loader);
    }

    /// Unload the loader rooted at `root` and stop routing events under it.
    /// Returns whether a loader was removed.
    pub fn remove_directory(&self, root: &Path) -> bool {
        let lowered = root.to_string_lossy().to_lowercase();
        let found = {
            let mut loaders = self.loaders.borrow_mut();
            let before = loaders.len();
            let mut removed = Vec::new();
            loaders.retain(|loader| {
                if loader.root().to_string_lossy().to_lowercase() == lowered {
                    removed.push(Rc::clone(loader));
                    false
                } else {
                    true
                }
            });
            debug_assert!(before - loaders.len() == removed.len());
            removed
        };
        for loader in &found {
            loader.unload();
        }
        !found.is_empty()
    }

    pub fn dispatch(&self, path: &Path, kind: ChangeKind) {
        let Some(loader) = self.find_loader(path) else {
            log::error!(
                "change event for {} does not fall under any watched root; dropped",
                path.display()
            );
            return;
        };
        match kind {
            ChangeKind::Changed => {
                if loader.unit_for(path).is_none() {
                    log::warn!(
                        "{} changed but was never loaded; files cannot join a running session",
                        path.display()
                    );
                    return;
                }
                if let Err(err) = loader.reload_script(path) {
                    // Already logged with context at the failure site; the
                    // watch loop keeps running with the old version current.
                    log::debug!("reload of {} failed: {}", path.display(), err);
                }
            }
            ChangeKind::Added | ChangeKind::Deleted => {
                log::debug!("ignoring {:?} event for {}", kind, path.display());
            }
        }
    }

    fn find_loader(&self, path: &Path) -> Option<Rc<DirectoryLoader>> {
        self.loaders
            .borrow()
            .iter()
            .filter_map(|loader| loader.match_depth(path).map(|depth| (depth, Rc::clone(loader))))
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, loader)| loader)
    }
}

impl Default for ChangeDispatcher {
    fn default() -> Self {
        ChangeDispatcher::new()
    }
}
