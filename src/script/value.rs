//! Runtime values.
//!
//! Functions and classes are the reload-sensitive kinds: both carry an
//! interior-mutable `origin` slot that stays `None` until a namespace claims
//! them on install, which is what the export heuristic keys off. Classes wrap
//! their member table and base link in `RefCell` so a reload can mutate them
//! behind a stable identity that existing instances keep pointing at.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::namespace::NamespaceNode;
use crate::script::ast::FunctionDecl;
use crate::script::env::ScopeRef;

/// Where an installed value lives: the claiming namespace path and the
/// source file that contributed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub namespace: String,
    pub file: PathBuf,
}

/// A script function: shared declaration plus the module scope free names
/// resolve against. Rebinding on reload builds a new `FunctionValue` around
/// the new declaration and the old scope.
pub struct FunctionValue {
    pub decl: Rc<FunctionDecl>,
    pub scope: ScopeRef,
    pub origin: RefCell<Option<Origin>>,
}

impl FunctionValue {
    pub fn new(decl: Rc<FunctionDecl>, scope: ScopeRef) -> Rc<Self> {
        Rc::new(FunctionValue {
            decl,
            scope,
            origin: RefCell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: the captured scope can reach back to this value.
        f.debug_struct("FunctionValue")
            .field("name", &self.decl.name)
            .field("params", &self.decl.params)
            .finish()
    }
}

/// A class object. The wrapper identity is stable across reloads; member
/// table and base link are swapped in place.
pub struct ClassValue {
    pub name: String,
    pub base: RefCell<Option<Rc<ClassValue>>>,
    pub members: RefCell<FxHashMap<String, Value>>,
    pub origin: RefCell<Option<Origin>>,
}

impl ClassValue {
    pub fn new(name: impl Into<String>, base: Option<Rc<ClassValue>>) -> Rc<Self> {
        Rc::new(ClassValue {
            name: name.into(),
            base: RefCell::new(base),
            members: RefCell::new(FxHashMap::default()),
            origin: RefCell::new(None),
        })
    }

    /// Look `name` up on this class, then up the base chain.
    pub fn lookup_member(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.members.borrow().get(name) {
            return Some(value.clone());
        }
        let base = self.base.borrow().clone();
        match base {
            Some(base) => base.lookup_member(name),
            None => None,
        }
    }

    pub fn set_member(&self, name: impl Into<String>, value: Value) {
        self.members.borrow_mut().insert(name.into(), value);
    }

    pub fn remove_member(&self, name: &str) -> Option<Value> {
        self.members.borrow_mut().remove(name)
    }

    pub fn has_own_member(&self, name: &str) -> bool {
        self.members.borrow().contains_key(name)
    }

    /// Member names defined directly on this class, sorted for stable
    /// iteration.
    pub fn own_member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// True if `candidate` is this class or appears anywhere on its base
    /// chain. Used to refuse base-link updates that would close a cycle.
    pub fn in_base_chain(self: &Rc<Self>, candidate: &Rc<ClassValue>) -> bool {
        let mut cursor = Some(Rc::clone(self));
        while let Some(class) = cursor {
            if Rc::ptr_eq(&class, candidate) {
                return true;
            }
            cursor = class.base.borrow().clone();
        }
        false
    }
}

impl fmt::Debug for ClassValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassValue")
            .field("name", &self.name)
            .field("members", &self.own_member_names())
            .finish()
    }
}

/// An instance. Holds its class by identity; reloads mutate the class, never
/// this link.
pub struct InstanceValue {
    pub class: Rc<ClassValue>,
    pub fields: RefCell<FxHashMap<String, Value>>,
}

impl InstanceValue {
    pub fn new(class: Rc<ClassValue>) -> Rc<Self> {
        Rc::new(InstanceValue {
            class,
            fields: RefCell::new(FxHashMap::default()),
        })
    }
}

impl fmt::Debug for InstanceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceValue")
            .field("class", &self.class.name)
            .finish()
    }
}

/// Built-in function. Errors carry a bare message; the interpreter attaches
/// the call site's line.
pub struct NativeFunction {
    pub name: &'static str,
    pub call: fn(&[Value]) -> Result<Value, String>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Function(Rc<FunctionValue>),
    Class(Rc<ClassValue>),
    Instance(Rc<InstanceValue>),
    Namespace(Rc<NamespaceNode>),
    Native(Rc<NativeFunction>),
}

/// Nesting bound for structural list comparison and display.
const LIST_DEPTH_LIMIT: usize = 32;

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Namespace(_) => "namespace",
            Value::Native(_) => "native function",
        }
    }

    /// Only `nil` and `false` are falsy.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Plain data has no identity the reconciler needs to preserve.
    pub fn is_plain(&self) -> bool {
        matches!(
            self,
            Value::Nil
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Str(_)
                | Value::List(_)
        )
    }

    /// Same concrete kind, regardless of contents.
    pub fn same_type(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// The `==` operator: structural over plain data (with int/float mixing),
    /// identity over everything else.
    pub fn script_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            _ => self.eq_at_depth(other, 0),
        }
    }

    /// Structural equality for the reconciler's "unchanged plain value" skip:
    /// both sides must be plain, the same concrete kind, and equal in
    /// content. Non-plain values never compare equal here.
    pub fn plain_eq(&self, other: &Value) -> bool {
        self.is_plain() && self.same_type(other) && self.eq_at_depth(other, 0)
    }

    fn eq_at_depth(&self, other: &Value, depth: usize) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                if depth >= LIST_DEPTH_LIMIT {
                    return false;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.eq_at_depth(y, depth + 1))
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Identity comparison: pointer equality for reference kinds, structural
    /// for plain immutable data.
    pub fn identity_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => self.same_type(other) && self.eq_at_depth(other, 0),
        }
    }

    /// The claimed origin, for kinds that record one.
    pub fn origin(&self) -> Option<Origin> {
        match self {
            Value::Function(f) => f.origin.borrow().clone(),
            Value::Class(c) => c.origin.borrow().clone(),
            _ => None,
        }
    }

    /// Stamp ownership onto the value, if its kind records origins.
    pub fn claim(&self, namespace: &str, file: &std::path::Path) {
        let origin = Origin {
            namespace: namespace.to_string(),
            file: file.to_path_buf(),
        };
        match self {
            Value::Function(f) => {
                *f.origin.borrow_mut() = Some(origin);
            }
            Value::Class(c) => {
                *c.origin.borrow_mut() = Some(origin);
            }
            _ => {}
        }
    }

    fn fmt_at_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => {
                if depth == 0 {
                    write!(f, "{}", s)
                } else {
                    write!(f, "\"{}\"", s)
                }
            }
            Value::List(items) => {
                if depth >= LIST_DEPTH_LIMIT {
                    return write!(f, "[...]");
                }
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_at_depth(f, depth + 1)?;
                }
                write!(f, "]")
            }
            Value::Function(func) => write!(f, "<fn {}>", func.name()),
            Value::Class(class) => write!(f, "<class {}>", class.name),
            Value::Instance(inst) => write!(f, "<{} instance>", inst.class.name),
            Value::Namespace(node) => write!(f, "<namespace {}>", node.path()),
            Value::Native(native) => write!(f, "<native fn {}>", native.name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at_depth(f, 0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name(), self)
    }
}
