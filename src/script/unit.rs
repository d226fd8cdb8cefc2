//! One source file's compiled form plus its most recent execution results.
//!
//! A unit is created on first discovery of its file and re-created, as a new
//! instance, on every detected change; the superseded instance is only read
//! side by side with its replacement while the reconciler works. Exactly one
//! unit is current for a given path at any time.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::error::{ReloadError, ReloadResult};
use crate::script::env::{Scope, ScopeRef};
use crate::script::interp::{Interp, ScriptError};
use crate::script::parser::parse;
use crate::script::value::Value;
use crate::script::ast::Stmt;

pub struct ScriptUnit {
    path: PathBuf,
    namespace_path: String,
    source: String,
    program: Vec<Stmt>,
    /// Top-level names produced by the most recent execution. Swapped for
    /// the surviving unit's scope when a reload merges into it.
    scope: RefCell<ScopeRef>,
    exports: RefCell<Option<Vec<String>>>,
    version: Cell<u32>,
    /// Names currently installed into the namespace by this unit.
    contributed: RefCell<FxHashSet<String>>,
    /// Names a predecessor contributed that this lineage never
    /// re-contributed; still live in the namespace under the old identity.
    leaked: RefCell<FxHashSet<String>>,
    last_error: RefCell<Option<ScriptError>>,
}

impl ScriptUnit {
    /// Read and parse `path`. Line endings are normalized and a trailing
    /// newline guaranteed before parsing; a parse failure surfaces as a
    /// `CompileError` carrying the file path.
    pub fn load(path: impl Into<PathBuf>, namespace_path: impl Into<String>) -> ReloadResult<Rc<Self>> {
        let path = path.into();
        let raw = fs::read_to_string(&path).map_err(|source| ReloadError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_source(path, namespace_path.into(), normalize(&raw))
    }

    fn from_source(path: PathBuf, namespace_path: String, source: String) -> ReloadResult<Rc<Self>> {
        let program = parse(&source).map_err(|source| ReloadError::Compile {
            path: path.clone(),
            source,
        })?;
        Ok(Rc::new(ScriptUnit {
            path,
            namespace_path,
            source,
            program,
            scope: RefCell::new(Scope::new()),
            exports: RefCell::new(None),
            version: Cell::new(1),
            contributed: RefCell::new(FxHashSet::default()),
            leaked: RefCell::new(FxHashSet::default()),
            last_error: RefCell::new(None),
        }))
    }

    /// Execute the compiled form in a fresh scope seeded only with
    /// `__file__`. On failure the error is captured on the unit; the
    /// returned error's `is_recoverable` distinguishes import-style failures
    /// from programming errors.
    pub fn run(&self, interp: &Interp) -> ReloadResult<()> {
        let scope = Scope::new();
        scope.set("__file__", Value::Str(self.path.display().to_string()));
        *self.scope.borrow_mut() = Rc::clone(&scope);
        *self.exports.borrow_mut() = None;

        match interp.run_module(&self.program, &scope) {
            Ok(()) => {
                *self.last_error.borrow_mut() = None;
                Ok(())
            }
            Err(err) => {
                *self.last_error.borrow_mut() = Some(err.clone());
                Err(ReloadError::Execution {
                    path: self.path.clone(),
                    source: err,
                })
            }
        }
    }

    /// Top-level names this unit contributes to its namespace: values that no
    /// namespace has claimed yet look locally defined, claimed ones are
    /// re-exported imports. Memoized on first call — installation mutates
    /// values to claim ownership, so a second scan would under-report.
    pub fn exports(&self) -> Vec<String> {
        if let Some(cached) = self.exports.borrow().as_ref() {
            return cached.clone();
        }
        let mut names = Vec::new();
        for (name, value) in self.scope.borrow().snapshot() {
            if name == "__file__" {
                continue;
            }
            let exported = match &value {
                Value::Namespace(_) => false,
                _ => value.origin().is_none(),
            };
            if exported {
                names.push(name);
            }
        }
        *self.exports.borrow_mut() = Some(names.clone());
        names
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn namespace_path(&self) -> &str {
        &self.namespace_path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn set_version(&self, version: u32) {
        self.version.set(version);
    }

    pub fn scope(&self) -> ScopeRef {
        Rc::clone(&self.scope.borrow())
    }

    /// Take over `scope` as this unit's locals. Called after a merge so the
    /// surviving environment object stays the one every rebound callable
    /// resolves against.
    pub fn adopt_scope(&self, scope: ScopeRef) {
        *self.scope.borrow_mut() = scope;
    }

    pub fn record_contribution(&self, name: &str) {
        self.contributed.borrow_mut().insert(name.to_string());
    }

    pub fn contributed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contributed.borrow().iter().cloned().collect();
        names.sort();
        names
    }

    pub fn set_contributed(&self, names: FxHashSet<String>) {
        *self.contributed.borrow_mut() = names;
    }

    pub fn leaked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.leaked.borrow().iter().cloned().collect();
        names.sort();
        names
    }

    pub fn has_leaked(&self, name: &str) -> bool {
        self.leaked.borrow().contains(name)
    }

    pub fn set_leaked(&self, names: FxHashSet<String>) {
        *self.leaked.borrow_mut() = names;
    }

    pub fn last_error(&self) -> Option<ScriptError> {
        self.last_error.borrow().clone()
    }

    /// Flush the captured execution error to the log. Warns if called with
    /// nothing captured, which would mean a bookkeeping bug upstream.
    pub fn log_last_error(&self) {
        match self.last_error.borrow_mut().take() {
            Some(err) => log::error!("{}: {}", self.path.display(), err),
            None => log::warn!(
                "{}: expected a captured error to report, found none",
                self.path.display()
            ),
        }
    }
}

impl fmt::Debug for ScriptUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptUnit")
            .field("path", &self.path)
            .field("namespace", &self.namespace_path)
            .field("version", &self.version.get())
            .finish()
    }
}

fn normalize(raw: &str) -> String {
    let mut source = raw.replace("\r\n", "\n").replace('\r', "\n");
    if !source.ends_with('\n') {
        source.push('\n');
    }
    source
}
