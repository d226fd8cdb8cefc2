//! The reload algorithm: diff an old and a new script unit for the same
//! path and apply merge/replace/leak decisions to the live namespace and
//! live class objects.
//!
//! The surviving identities are the old unit's: its scope stays the
//! environment every rebound callable resolves against, and its class
//! objects stay the types existing instances point at. The new unit supplies
//! declarations; what it produced while running is merged into the old
//! identities, not installed alongside them.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::namespace::{NamespaceNode, NamespaceRegistry};
use crate::reload::{AlwaysCompatible, ReloadPolicy};
use crate::script::env::ScopeRef;
use crate::script::value::{ClassValue, FunctionValue, Value};
use crate::script::ScriptUnit;

/// Where a leaked attribute came from: the file and unit version that last
/// contributed it before it stopped being produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakEntry {
    pub file: PathBuf,
    pub version: u32,
}

/// Applies reloads to the live namespace tree. One reconciler spans a whole
/// reload session; its leak registry outlives any individual unit.
pub struct Reconciler {
    registry: Rc<NamespaceRegistry>,
    policy: Box<dyn ReloadPolicy>,
    leaked: RefCell<FxHashMap<String, LeakEntry>>,
}

impl Reconciler {
    pub fn new(registry: Rc<NamespaceRegistry>) -> Self {
        Self::with_policy(registry, Box::new(AlwaysCompatible))
    }

    pub fn with_policy(registry: Rc<NamespaceRegistry>, policy: Box<dyn ReloadPolicy>) -> Self {
        Reconciler {
            registry,
            policy,
            leaked: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn registry(&self) -> &Rc<NamespaceRegistry> {
        &self.registry
    }

    /// Consult the compatibility hook. The default policy accepts every
    /// reload; a host can install a stricter one.
    pub fn check_compatibility(&self, old: &ScriptUnit, new: &ScriptUnit) -> bool {
        self.policy.is_compatible(old, new)
    }

    pub fn is_attribute_leaked(&self, name: &str) -> bool {
        self.leaked.borrow().contains_key(name)
    }

    pub fn leaked_attribute_version(&self, name: &str) -> Option<u32> {
        self.leaked.borrow().get(name).map(|entry| entry.version)
    }

    pub fn leaked_attribute_file(&self, name: &str) -> Option<PathBuf> {
        self.leaked.borrow().get(name).map(|entry| entry.file.clone())
    }

    /// Reconcile `new` against `old` (or install it outright when there is
    /// no predecessor) into `node`. Both units have already been compiled
    /// and run; nothing here can fail, only log.
    pub fn reconcile(
        &self,
        old: Option<&Rc<ScriptUnit>>,
        new: &Rc<ScriptUnit>,
        node: &Rc<NamespaceNode>,
    ) {
        match old {
            None => self.install(new, node),
            Some(old) => self.merge(old, new, node),
        }
    }

    /// Pure addition: every export goes straight into the namespace.
    fn install(&self, unit: &Rc<ScriptUnit>, node: &Rc<NamespaceNode>) {
        let scope = unit.scope();
        let exports = unit.exports();
        let allow = self.reclaimable(&exports);
        for name in &exports {
            let Some(value) = scope.get(name) else {
                continue;
            };
            if self
                .registry
                .insert_attribute(node, name, value, unit.path(), &allow)
            {
                unit.record_contribution(name);
                self.clear_leak(name, unit);
            }
        }
    }

    fn merge(&self, old: &Rc<ScriptUnit>, new: &Rc<ScriptUnit>, node: &Rc<NamespaceNode>) {
        let old_scope = old.scope();
        let new_scope = new.scope();

        // Diff the exported surface and the full top-level mapping. Both
        // export sets are memoized snapshots: the old one from install time,
        // the new one computed here before any claims happen.
        let old_exports: FxHashSet<String> = old.exports().into_iter().collect();
        let new_exports = new.exports();

        // Pre-merge installed values, for the type comparison in the export
        // reconciliation. The old scope is about to be mutated.
        let installed: FxHashMap<String, Value> = old_exports
            .iter()
            .filter_map(|name| node.get_attribute(name).map(|v| (name.clone(), v)))
            .collect();

        // Local rebinding pass over the new unit's full top-level mapping.
        // Helper names that never reach the namespace still participate, so
        // that rebound functions see them through the old scope.
        let mut merged: Vec<(String, Rc<ClassValue>, Rc<ClassValue>)> = Vec::new();
        let mut added_classes: Vec<(String, Rc<ClassValue>)> = Vec::new();
        for (name, new_value) in new_scope.snapshot() {
            if name == "__file__" {
                continue;
            }
            let old_value = old_scope.get(&name);
            match (&new_value, &old_value) {
                (Value::Class(new_class), Some(Value::Class(old_class))) => {
                    merged.push((name, Rc::clone(old_class), Rc::clone(new_class)));
                }
                (Value::Class(new_class), _) => {
                    added_classes.push((name, Rc::clone(new_class)));
                }
                (Value::Function(func), _) => {
                    // Rebind against the old unit's locals: the fresh body
                    // must see the module's still-live bindings.
                    let rebound =
                        FunctionValue::new(Rc::clone(&func.decl), Rc::clone(&old_scope));
                    old_scope.set(name, Value::Function(rebound));
                }
                _ => {
                    if let Some(old_value) = &old_value {
                        if new_value.plain_eq(old_value) {
                            continue;
                        }
                    }
                    old_scope.set(name, new_value.clone());
                }
            }
        }

        // Class merge pass. The old class object is the surviving identity;
        // existing instances' type pointers must keep working.
        for (name, old_class, new_class) in &merged {
            self.merge_class(name, old_class, new_class, &old_scope, &merged);
        }
        // A class with no predecessor keeps the new object as the installed
        // identity, but its methods move onto the surviving scope so that
        // later reloads of this file keep propagating into them.
        for (name, class) in &added_classes {
            rebind_class_methods(class, &old_scope);
            old_scope.set(name.clone(), Value::Class(Rc::clone(class)));
        }

        // Export reconciliation.
        let new_export_set: FxHashSet<String> = new_exports.iter().cloned().collect();
        let mut contributed: FxHashSet<String> = FxHashSet::default();
        let mut allow: FxHashSet<String> = self.reclaimable(&new_exports);
        for name in &new_exports {
            if old_exports.contains(name) || old.has_leaked(name) {
                allow.insert(name.clone());
            }
        }

        for name in &new_exports {
            let Some(value) = old_scope.get(name) else {
                continue;
            };
            let skip = match installed.get(name) {
                Some(installed_value) if installed_value.same_type(&value) => {
                    // The in-place class merge already updated the live
                    // object; so did the plain-equal no-op. Everything else
                    // (rebound functions, changed plain values) must still
                    // reach the namespace.
                    matches!(value, Value::Class(_)) || installed_value.plain_eq(&value)
                }
                Some(installed_value) => {
                    log::info!(
                        "'{}' in namespace '{}' changed type from {} to {}",
                        name,
                        node.path(),
                        installed_value.type_name(),
                        value.type_name()
                    );
                    false
                }
                None => false,
            };
            if skip || self
                .registry
                .insert_attribute(node, name, value, new.path(), &allow)
            {
                contributed.insert(name.clone());
                self.clear_leak(name, new);
            }
        }

        // Removed exports are not deleted: the old value stays installed and
        // the name is recorded as leaked against the superseded version.
        let mut removed: Vec<&String> = old_exports.difference(&new_export_set).collect();
        removed.sort();
        let mut leaked_names: FxHashSet<String> = FxHashSet::default();
        for name in removed {
            if node.has_attribute(name) {
                log::warn!(
                    "'{}' is no longer produced by {}; value from version {} stays installed in '{}'",
                    name,
                    old.path().display(),
                    old.version(),
                    node.path()
                );
                self.leaked.borrow_mut().insert(
                    name.clone(),
                    LeakEntry {
                        file: old.path().to_path_buf(),
                        version: old.version(),
                    },
                );
                leaked_names.insert(name.clone());
            }
        }
        // Carry the predecessor's leaks forward, minus re-contributions.
        for name in old.leaked_names() {
            if !new_export_set.contains(&name) {
                leaked_names.insert(name);
            }
        }

        new.set_version(old.version() + 1);
        new.set_contributed(contributed);
        new.set_leaked(leaked_names);
        new.adopt_scope(old_scope);
        node.attach_file(new.path());
    }

    fn merge_class(
        &self,
        name: &str,
        old_class: &Rc<ClassValue>,
        new_class: &Rc<ClassValue>,
        scope: &ScopeRef,
        merged: &[(String, Rc<ClassValue>, Rc<ClassValue>)],
    ) {
        // Members defined by the new version overwrite; functions are
        // rebound against the surviving scope first.
        for member in new_class.own_member_names() {
            let Some(value) = new_class.lookup_member(&member) else {
                continue;
            };
            let value = match value {
                Value::Function(func) => Value::Function(FunctionValue::new(
                    Rc::clone(&func.decl),
                    Rc::clone(scope),
                )),
                other => other,
            };
            old_class.set_member(member, value);
        }
        // Deletions propagate.
        for member in old_class.own_member_names() {
            if !new_class.has_own_member(&member) {
                old_class.remove_member(&member);
                log::debug!("removed member '{}' from class {}", member, name);
            }
        }

        // Base link: the new definition's base, mapped through the classes
        // merged in this same pass so a same-file base resolves to its
        // surviving identity.
        let new_base = new_class.base.borrow().clone();
        let mapped = new_base.map(|base| {
            merged
                .iter()
                .find(|(_, _, fresh)| Rc::ptr_eq(fresh, &base))
                .map(|(_, survivor, _)| Rc::clone(survivor))
                .unwrap_or(base)
        });
        let old_base = old_class.base.borrow().clone();
        let changed = match (&old_base, &mapped) {
            (None, None) => false,
            (Some(a), Some(b)) => !Rc::ptr_eq(a, b),
            _ => true,
        };
        if changed {
            if let Some(base) = &mapped {
                if base.in_base_chain(old_class) {
                    log::error!(
                        "not updating base of class {}: the new base chain loops back through it",
                        name
                    );
                    return;
                }
            }
            log::info!("class {} base link updated", name);
            *old_class.base.borrow_mut() = mapped;
        }
    }

    /// Leaked names a contribution may overwrite without tripping the
    /// duplicate-contribution rule.
    fn reclaimable(&self, exports: &[String]) -> FxHashSet<String> {
        let leaked = self.leaked.borrow();
        exports
            .iter()
            .filter(|name| leaked.contains_key(*name))
            .cloned()
            .collect()
    }

    fn clear_leak(&self, name: &str, unit: &ScriptUnit) {
        if self.leaked.borrow_mut().remove(name).is_some() {
            log::info!(
                "'{}' re-contributed by {}; leak record cleared",
                name,
                unit.path().display()
            );
        }
    }
}

fn rebind_class_methods(class: &Rc<ClassValue>, scope: &ScopeRef) {
    for member in class.own_member_names() {
        if let Some(Value::Function(func)) = class.lookup_member(&member) {
            class.set_member(
                member,
                Value::Function(FunctionValue::new(Rc::clone(&func.decl), Rc::clone(scope))),
            );
        }
    }
}
