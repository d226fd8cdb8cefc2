//! Module-level scopes.
//!
//! Every callable created from a script unit holds an `Rc` to the unit's
//! scope and resolves free names through it at call time. This is the handle
//! the reconciler retargets on reload: a rebound function is a new value
//! pointing at the old unit's scope, and when a merge succeeds the new unit
//! adopts that scope outright, so one shared environment object survives any
//! number of reloads.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::script::value::Value;

pub type ScopeRef = Rc<Scope>;

pub struct Scope {
    bindings: RefCell<FxHashMap<String, Value>>,
}

impl Scope {
    pub fn new() -> ScopeRef {
        Rc::new(Scope {
            bindings: RefCell::new(FxHashMap::default()),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.bindings.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.bindings.borrow_mut().clear();
    }

    /// Binding names in sorted order, for deterministic iteration.
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted (name, value) pairs as of now.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = self
            .bindings
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Names only: values can point back into this scope.
        f.debug_struct("Scope")
            .field("names", &self.sorted_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let scope = Scope::new();
        assert!(scope.is_empty());
        scope.set("x", Value::Int(1));
        scope.set("x", Value::Int(2));
        assert_eq!(scope.len(), 1);
        match scope.get("x") {
            Some(Value::Int(2)) => {}
            other => panic!("expected overwritten binding, got {:?}", other),
        }
        assert!(scope.remove("x").is_some());
        assert!(scope.get("x").is_none());
    }

    #[test]
    fn test_shared_visibility() {
        let scope = Scope::new();
        let alias = Rc::clone(&scope);
        scope.set("shared", Value::Str("yes".to_string()));
        assert!(alias.contains("shared"));
    }

    #[test]
    fn test_sorted_names() {
        let scope = Scope::new();
        scope.set("b", Value::Int(2));
        scope.set("a", Value::Int(1));
        scope.set("c", Value::Int(3));
        assert_eq!(scope.sorted_names(), vec!["a", "b", "c"]);
    }
}
