//! The process-wide namespace tree.
//!
//! Script files contribute their exports to namespace nodes addressed by
//! dotted path (`game.logic.ai`). Nodes are created lazily top-down when the
//! first contributor arrives and destroyed bottom-up when the last one
//! leaves. A child node is installed as an attribute of its parent, so
//! scripts walk the tree with ordinary attribute access after an `import`.
//!
//! The registry is an explicit object rather than ambient global state: every
//! component that resolves or installs namespace entries holds a handle to
//! the one registry of its session.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{ReloadError, ReloadResult};
use crate::script::Value;

/// One node of the namespace tree. Attribute table and contributor set are
/// interior-mutable; the node itself keeps a stable identity for as long as
/// anything contributes to it.
pub struct NamespaceNode {
    path: String,
    attributes: RefCell<FxHashMap<String, Value>>,
    contributors: RefCell<FxHashSet<PathBuf>>,
}

impl NamespaceNode {
    fn new(path: String) -> Rc<Self> {
        Rc::new(NamespaceNode {
            path,
            attributes: RefCell::new(FxHashMap::default()),
            contributors: RefCell::new(FxHashSet::default()),
        })
    }

    /// Full dotted path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.borrow().get(name).cloned()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.borrow().contains_key(name)
    }

    /// Attribute names in sorted order.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn set_attribute(&self, name: impl Into<String>, value: Value) {
        self.attributes.borrow_mut().insert(name.into(), value);
    }

    pub(crate) fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.borrow_mut().remove(name)
    }

    fn attributes_empty(&self) -> bool {
        self.attributes.borrow().is_empty()
    }

    pub(crate) fn attach_file(&self, file: &Path) {
        self.contributors.borrow_mut().insert(file.to_path_buf());
    }

    pub(crate) fn detach_file(&self, file: &Path) {
        self.contributors.borrow_mut().remove(file);
    }

    pub fn has_contributors(&self) -> bool {
        !self.contributors.borrow().is_empty()
    }

    pub fn contributes(&self, file: &Path) -> bool {
        self.contributors.borrow().contains(file)
    }
}

impl fmt::Debug for NamespaceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow: attributes include child namespace links.
        f.debug_struct("NamespaceNode")
            .field("path", &self.path)
            .field("attributes", &self.attribute_names())
            .finish()
    }
}

/// The registry owning every namespace node of a session, keyed by dotted
/// path.
pub struct NamespaceRegistry {
    nodes: RefCell<FxHashMap<String, Rc<NamespaceNode>>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        NamespaceRegistry {
            nodes: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn get(&self, path: &str) -> Option<Rc<NamespaceNode>> {
        self.nodes.borrow().get(path).cloned()
    }

    pub fn namespace_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Dotted paths of all live nodes, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.nodes.borrow().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Get or create the node at `path`, creating every missing ancestor and
    /// linking each new node under its parent. Idempotent. Fails with
    /// `NamespaceConflict` if a non-namespace value already occupies a
    /// position on the path.
    pub fn create_namespace(&self, path: &str) -> ReloadResult<Rc<NamespaceNode>> {
        if path.is_empty() || path.split('.').any(|seg| seg.is_empty()) {
            return Err(ReloadError::NamespaceConflict {
                path: path.to_string(),
                message: "namespace path has an empty segment".to_string(),
            });
        }

        let mut current: Option<Rc<NamespaceNode>> = None;
        let mut full = String::new();
        for segment in path.split('.') {
            if !full.is_empty() {
                full.push('.');
            }
            full.push_str(segment);

            let existing = self.get(&full);
            let node = match existing {
                Some(node) => node,
                None => {
                    if let Some(parent) = &current {
                        match parent.get_attribute(segment) {
                            Some(Value::Namespace(_)) | None => {}
                            Some(other) => {
                                return Err(ReloadError::NamespaceConflict {
                                    path: full,
                                    message: format!(
                                        "position is occupied by a {} value",
                                        other.type_name()
                                    ),
                                });
                            }
                        }
                    }
                    let node = NamespaceNode::new(full.clone());
                    if let Some(parent) = &current {
                        parent.set_attribute(segment, Value::Namespace(Rc::clone(&node)));
                    }
                    self.nodes
                        .borrow_mut()
                        .insert(full.clone(), Rc::clone(&node));
                    log::debug!("created namespace '{}'", full);
                    node
                }
            };
            current = Some(node);
        }

        current.ok_or_else(|| ReloadError::NamespaceConflict {
            path: path.to_string(),
            message: "empty namespace path".to_string(),
        })
    }

    /// Remove the node at `path` and prune any ancestor that existed solely
    /// to host it. Refuses (logs and no-ops) while the node still has
    /// contributing files or child namespaces.
    pub fn destroy_namespace(&self, path: &str) {
        let Some(node) = self.get(path) else {
            log::debug!("destroy of unknown namespace '{}' ignored", path);
            return;
        };
        if node.has_contributors() {
            log::warn!(
                "not destroying namespace '{}': files still contribute to it",
                path
            );
            return;
        }
        if self.has_children(path) {
            log::warn!(
                "not destroying namespace '{}': child namespaces still exist",
                path
            );
            return;
        }

        self.nodes.borrow_mut().remove(path);
        log::debug!("destroyed namespace '{}'", path);

        // Unlink from the parent, then prune ancestors bottom-up while they
        // hold nothing but the link just removed.
        let mut current = path.to_string();
        while let Some((parent_path, segment)) = current.rsplit_once('.') {
            let Some(parent) = self.get(parent_path) else {
                break;
            };
            parent.remove_attribute(segment);
            if parent.has_contributors()
                || self.has_children(parent_path)
                || !parent.attributes_empty()
            {
                break;
            }
            self.nodes.borrow_mut().remove(parent_path);
            log::debug!("destroyed empty ancestor namespace '{}'", parent_path);
            current = parent_path.to_string();
        }
    }

    /// Install `value` as `name` on `node`. If the attribute already exists
    /// and is not in `allow_overwrite` this is a duplicate contribution: the
    /// first writer wins, the new value is dropped and the collision is
    /// logged. Returns whether the value was installed.
    pub fn insert_attribute(
        &self,
        node: &Rc<NamespaceNode>,
        name: &str,
        value: Value,
        file: &Path,
        allow_overwrite: &FxHashSet<String>,
    ) -> bool {
        if node.has_attribute(name) && !allow_overwrite.contains(name) {
            let holder = node
                .get_attribute(name)
                .and_then(|v| v.origin())
                .map(|origin| origin.file.display().to_string())
                .unwrap_or_else(|| "an earlier contribution".to_string());
            log::error!(
                "duplicate contribution of '{}' to namespace '{}' from {}; keeping value from {}",
                name,
                node.path(),
                file.display(),
                holder
            );
            return false;
        }
        value.claim(node.path(), file);
        node.set_attribute(name, value);
        node.attach_file(file);
        true
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{}.", path);
        self.nodes
            .borrow()
            .keys()
            .any(|key| key.starts_with(&prefix))
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        NamespaceRegistry::new()
    }
}
