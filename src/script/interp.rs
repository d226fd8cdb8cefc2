//! Tree-walking evaluator.
//!
//! Module top-level code runs directly against the unit's scope; function
//! bodies run in a call frame that falls back to the function's captured
//! module scope, then to the builtins. Imports resolve against the process
//! namespace registry at execution time, which is what makes load-order
//! dependencies between files retryable: an import of a namespace that has
//! not been populated yet fails with a recoverable import error.

use std::cell::Cell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::namespace::NamespaceRegistry;
use crate::script::ast::{AssignTarget, BinaryOp, Expr, Literal, Stmt, UnaryOp};
use crate::script::env::ScopeRef;
use crate::script::value::{ClassValue, FunctionValue, InstanceValue, NativeFunction, Value};

/// Frames deeper than this abort with a runtime error instead of overflowing
/// the host stack.
const MAX_CALL_DEPTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    /// An `import`/`from ... import` that could not be resolved. Recoverable:
    /// the missing namespace may appear once more files have loaded.
    ImportFailure,
    /// Every other runtime failure. A programming error in the script, not a
    /// load-ordering issue.
    Runtime,
}

/// Structured runtime error: message plus the source line of the statement
/// that was executing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} (line {line})")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
    pub line: u32,
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>, line: u32) -> Self {
        ScriptError {
            kind: ScriptErrorKind::Runtime,
            message: message.into(),
            line,
        }
    }

    pub fn import_failure(message: impl Into<String>, line: u32) -> Self {
        ScriptError {
            kind: ScriptErrorKind::ImportFailure,
            message: message.into(),
            line,
        }
    }

    pub fn is_import_failure(&self) -> bool {
        self.kind == ScriptErrorKind::ImportFailure
    }
}

enum Flow {
    Normal,
    Return(Value),
}

struct ExecCtx {
    /// Call-frame locals; `None` at module top level, where assignment
    /// writes straight into the scope.
    locals: Option<FxHashMap<String, Value>>,
    scope: ScopeRef,
}

pub struct Interp {
    registry: Rc<NamespaceRegistry>,
    depth: Cell<usize>,
}

impl Interp {
    pub fn new(registry: Rc<NamespaceRegistry>) -> Self {
        Interp {
            registry,
            depth: Cell::new(0),
        }
    }

    /// Execute a file's top-level statements against `scope`.
    pub fn run_module(&self, program: &[Stmt], scope: &ScopeRef) -> Result<(), ScriptError> {
        let mut ctx = ExecCtx {
            locals: None,
            scope: Rc::clone(scope),
        };
        for stmt in program {
            // The parser rejects top-level `return`; a Return flow here would
            // mean a parser bug, so treat it as end of module.
            if let Flow::Return(_) = self.exec_stmt(stmt, &mut ctx)? {
                break;
            }
        }
        Ok(())
    }

    /// Call a function value with already-evaluated arguments.
    pub fn call_function(
        &self,
        func: &Rc<FunctionValue>,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        self.invoke_function(func, args, func.decl.line)
    }

    /// Call `receiver.name(args)` the way a script would: instance fields
    /// first, then the class chain with the receiver passed as `self`.
    pub fn call_method(
        &self,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        self.call_attribute(receiver, name, args, 0)
    }

    // ------------------------------------------------------------------
    // Statements

    fn exec_block(&self, stmts: &[Stmt], ctx: &mut ExecCtx) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec_stmt(stmt, ctx)? {
                Flow::Normal => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, ctx: &mut ExecCtx) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Expr { expr, line } => {
                self.eval(expr, ctx, *line)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign {
                target,
                value,
                line,
            } => {
                let value = self.eval(value, ctx, *line)?;
                self.assign(target, value, ctx, *line)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                line,
            } => {
                if self.eval(cond, ctx, *line)?.truthy() {
                    self.exec_block(then_body, ctx)
                } else {
                    self.exec_block(else_body, ctx)
                }
            }
            Stmt::While { cond, body, line } => {
                while self.eval(cond, ctx, *line)?.truthy() {
                    if let flow @ Flow::Return(_) = self.exec_block(body, ctx)? {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return { value, line } => {
                let value = match value {
                    Some(expr) => self.eval(expr, ctx, *line)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::FunctionDef(decl) => {
                let func = FunctionValue::new(Rc::clone(decl), Rc::clone(&ctx.scope));
                self.bind(ctx, &decl.name, Value::Function(func));
                Ok(Flow::Normal)
            }
            Stmt::ClassDef(decl) => {
                let base = match &decl.base {
                    Some(expr) => match self.eval(expr, ctx, decl.line)? {
                        Value::Class(base) => Some(base),
                        other => {
                            return Err(ScriptError::runtime(
                                format!(
                                    "base of class {} is a {}, not a class",
                                    decl.name,
                                    other.type_name()
                                ),
                                decl.line,
                            ));
                        }
                    },
                    None => None,
                };
                let class = ClassValue::new(decl.name.clone(), base);
                for (name, expr) in &decl.constants {
                    let value = self.eval(expr, ctx, decl.line)?;
                    class.set_member(name.clone(), value);
                }
                for method in &decl.methods {
                    let func = FunctionValue::new(Rc::clone(method), Rc::clone(&ctx.scope));
                    class.set_member(method.name.clone(), Value::Function(func));
                }
                self.bind(ctx, &decl.name, Value::Class(class));
                Ok(Flow::Normal)
            }
            Stmt::Import { path, line } => {
                let dotted = path.join(".");
                let node = self.registry.get(&dotted).ok_or_else(|| {
                    ScriptError::import_failure(
                        format!("namespace '{}' is not loaded", dotted),
                        *line,
                    )
                })?;
                let binding = path.last().map(String::as_str).unwrap_or(&dotted);
                self.bind(ctx, binding, Value::Namespace(node));
                Ok(Flow::Normal)
            }
            Stmt::FromImport { path, names, line } => {
                let dotted = path.join(".");
                let node = self.registry.get(&dotted).ok_or_else(|| {
                    ScriptError::import_failure(
                        format!("namespace '{}' is not loaded", dotted),
                        *line,
                    )
                })?;
                for name in names {
                    let value = node.get_attribute(name).ok_or_else(|| {
                        ScriptError::import_failure(
                            format!("'{}' not found in namespace '{}'", name, dotted),
                            *line,
                        )
                    })?;
                    self.bind(ctx, name, value);
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn bind(&self, ctx: &mut ExecCtx, name: &str, value: Value) {
        match &mut ctx.locals {
            Some(locals) => {
                locals.insert(name.to_string(), value);
            }
            None => ctx.scope.set(name, value),
        }
    }

    fn assign(
        &self,
        target: &AssignTarget,
        value: Value,
        ctx: &mut ExecCtx,
        line: u32,
    ) -> Result<(), ScriptError> {
        match target {
            AssignTarget::Name(name) => {
                self.bind(ctx, name, value);
                Ok(())
            }
            AssignTarget::Attribute { object, name } => {
                match self.eval(object, ctx, line)? {
                    Value::Instance(inst) => {
                        inst.fields.borrow_mut().insert(name.clone(), value);
                        Ok(())
                    }
                    Value::Class(class) => {
                        class.set_member(name.clone(), value);
                        Ok(())
                    }
                    Value::Namespace(node) => Err(ScriptError::runtime(
                        format!(
                            "namespace '{}' attributes are read-only; values are installed by loading files",
                            node.path()
                        ),
                        line,
                    )),
                    other => Err(ScriptError::runtime(
                        format!("cannot set attribute on a {}", other.type_name()),
                        line,
                    )),
                }
            }
            AssignTarget::Index { object, index } => {
                let object = self.eval(object, ctx, line)?;
                let index = self.eval(index, ctx, line)?;
                match (object, index) {
                    (Value::List(items), Value::Int(i)) => {
                        let mut items = items.borrow_mut();
                        let len = items.len();
                        let slot = usize::try_from(i)
                            .ok()
                            .filter(|i| *i < len)
                            .ok_or_else(|| {
                                ScriptError::runtime(
                                    format!("index {} out of range (length {})", i, len),
                                    line,
                                )
                            })?;
                        items[slot] = value;
                        Ok(())
                    }
                    (Value::List(_), other) => Err(ScriptError::runtime(
                        format!("list index must be an int, got {}", other.type_name()),
                        line,
                    )),
                    (other, _) => Err(ScriptError::runtime(
                        format!("a {} cannot be indexed", other.type_name()),
                        line,
                    )),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions

    fn eval(&self, expr: &Expr, ctx: &mut ExecCtx, line: u32) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Nil => Value::Nil,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(x) => Value::Float(*x),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, ctx, line)?);
                }
                Ok(Value::list(values))
            }
            Expr::Name(name) => self.lookup(ctx, name).ok_or_else(|| {
                ScriptError::runtime(format!("undefined name '{}'", name), line)
            }),
            Expr::Attribute { object, name } => {
                let object = self.eval(object, ctx, line)?;
                self.get_attribute(&object, name, line)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, ctx, line)?;
                let index = self.eval(index, ctx, line)?;
                match (&object, &index) {
                    (Value::List(items), Value::Int(i)) => {
                        let items = items.borrow();
                        usize::try_from(*i)
                            .ok()
                            .and_then(|i| items.get(i).cloned())
                            .ok_or_else(|| {
                                ScriptError::runtime(
                                    format!(
                                        "index {} out of range (length {})",
                                        i,
                                        items.len()
                                    ),
                                    line,
                                )
                            })
                    }
                    (Value::List(_), other) => Err(ScriptError::runtime(
                        format!("list index must be an int, got {}", other.type_name()),
                        line,
                    )),
                    (other, _) => Err(ScriptError::runtime(
                        format!("a {} cannot be indexed", other.type_name()),
                        line,
                    )),
                }
            }
            Expr::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, ctx, line)?);
                }
                // `obj.m(...)` dispatches through the receiver so instance
                // methods get `self`; every other callee is evaluated
                // normally and called as a plain value.
                if let Expr::Attribute { object, name } = callee.as_ref() {
                    let object = self.eval(object, ctx, line)?;
                    return self.call_attribute(&object, name, &values, line);
                }
                let callee = self.eval(callee, ctx, line)?;
                self.call_value(&callee, &values, line)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, ctx, line)?;
                match op {
                    UnaryOp::Neg => match operand {
                        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| {
                            ScriptError::runtime("integer overflow", line)
                        }),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        other => Err(ScriptError::runtime(
                            format!("cannot negate a {}", other.type_name()),
                            line,
                        )),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
                }
            }
            Expr::Binary { op, left, right } => match op {
                // Short-circuit operators yield the deciding operand.
                BinaryOp::And => {
                    let left = self.eval(left, ctx, line)?;
                    if left.truthy() {
                        self.eval(right, ctx, line)
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::Or => {
                    let left = self.eval(left, ctx, line)?;
                    if left.truthy() {
                        Ok(left)
                    } else {
                        self.eval(right, ctx, line)
                    }
                }
                _ => {
                    let left = self.eval(left, ctx, line)?;
                    let right = self.eval(right, ctx, line)?;
                    self.binary_op(*op, left, right, line)
                }
            },
        }
    }

    fn lookup(&self, ctx: &ExecCtx, name: &str) -> Option<Value> {
        if let Some(locals) = &ctx.locals {
            if let Some(value) = locals.get(name) {
                return Some(value.clone());
            }
        }
        if let Some(value) = ctx.scope.get(name) {
            return Some(value);
        }
        builtin(name)
    }

    fn get_attribute(
        &self,
        object: &Value,
        name: &str,
        line: u32,
    ) -> Result<Value, ScriptError> {
        match object {
            Value::Namespace(node) => node.get_attribute(name).ok_or_else(|| {
                ScriptError::runtime(
                    format!("namespace '{}' has no attribute '{}'", node.path(), name),
                    line,
                )
            }),
            Value::Instance(inst) => inst
                .fields
                .borrow()
                .get(name)
                .cloned()
                .or_else(|| inst.class.lookup_member(name))
                .ok_or_else(|| {
                    ScriptError::runtime(
                        format!(
                            "{} instance has no attribute '{}'",
                            inst.class.name, name
                        ),
                        line,
                    )
                }),
            Value::Class(class) => class.lookup_member(name).ok_or_else(|| {
                ScriptError::runtime(
                    format!("class {} has no attribute '{}'", class.name, name),
                    line,
                )
            }),
            other => Err(ScriptError::runtime(
                format!("a {} has no attributes", other.type_name()),
                line,
            )),
        }
    }

    fn call_attribute(
        &self,
        object: &Value,
        name: &str,
        args: &[Value],
        line: u32,
    ) -> Result<Value, ScriptError> {
        if let Value::Instance(inst) = object {
            let field = inst.fields.borrow().get(name).cloned();
            if let Some(value) = field {
                return self.call_value(&value, args, line);
            }
            return match inst.class.lookup_member(name) {
                Some(Value::Function(func)) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(object.clone());
                    full.extend_from_slice(args);
                    self.invoke_function(&func, &full, line)
                }
                Some(other) => self.call_value(&other, args, line),
                None => Err(ScriptError::runtime(
                    format!("{} instance has no method '{}'", inst.class.name, name),
                    line,
                )),
            };
        }
        let callee = self.get_attribute(object, name, line)?;
        self.call_value(&callee, args, line)
    }

    fn call_value(
        &self,
        callee: &Value,
        args: &[Value],
        line: u32,
    ) -> Result<Value, ScriptError> {
        match callee {
            Value::Function(func) => self.invoke_function(func, args, line),
            Value::Native(native) => {
                (native.call)(args).map_err(|message| ScriptError::runtime(message, line))
            }
            Value::Class(class) => self.construct(class, args, line),
            other => Err(ScriptError::runtime(
                format!("a {} is not callable", other.type_name()),
                line,
            )),
        }
    }

    fn invoke_function(
        &self,
        func: &Rc<FunctionValue>,
        args: &[Value],
        line: u32,
    ) -> Result<Value, ScriptError> {
        if args.len() != func.decl.params.len() {
            return Err(ScriptError::runtime(
                format!(
                    "{}() takes {} argument(s), got {}",
                    func.name(),
                    func.decl.params.len(),
                    args.len()
                ),
                line,
            ));
        }
        if self.depth.get() >= MAX_CALL_DEPTH {
            return Err(ScriptError::runtime("call depth limit exceeded", line));
        }

        let mut locals = FxHashMap::default();
        for (param, arg) in func.decl.params.iter().zip(args) {
            locals.insert(param.clone(), arg.clone());
        }
        let mut ctx = ExecCtx {
            locals: Some(locals),
            scope: Rc::clone(&func.scope),
        };

        self.depth.set(self.depth.get() + 1);
        let flow = self.exec_block(&func.decl.body, &mut ctx);
        self.depth.set(self.depth.get() - 1);

        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }

    fn construct(
        &self,
        class: &Rc<ClassValue>,
        args: &[Value],
        line: u32,
    ) -> Result<Value, ScriptError> {
        let instance = Value::Instance(InstanceValue::new(Rc::clone(class)));
        match class.lookup_member("init") {
            Some(Value::Function(init)) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(instance.clone());
                full.extend_from_slice(args);
                self.invoke_function(&init, &full, line)?;
            }
            Some(other) => {
                return Err(ScriptError::runtime(
                    format!(
                        "init on class {} is a {}, not a function",
                        class.name,
                        other.type_name()
                    ),
                    line,
                ));
            }
            None => {
                if !args.is_empty() {
                    return Err(ScriptError::runtime(
                        format!(
                            "class {} has no init and takes no constructor arguments",
                            class.name
                        ),
                        line,
                    ));
                }
            }
        }
        Ok(instance)
    }

    fn binary_op(
        &self,
        op: BinaryOp,
        left: Value,
        right: Value,
        line: u32,
    ) -> Result<Value, ScriptError> {
        use BinaryOp::*;
        let type_error = |verb: &str, l: &Value, r: &Value| {
            ScriptError::runtime(
                format!("cannot {} {} and {}", verb, l.type_name(), r.type_name()),
                line,
            )
        };
        let overflow = || ScriptError::runtime("integer overflow", line);
        let div_zero = || ScriptError::runtime("division by zero", line);

        match op {
            Add => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => {
                    a.checked_add(*b).map(Value::Int).ok_or_else(overflow)
                }
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
                (Value::List(a), Value::List(b)) => {
                    let mut items = a.borrow().clone();
                    items.extend(b.borrow().iter().cloned());
                    Ok(Value::list(items))
                }
                _ => self
                    .float_pair(&left, &right)
                    .map(|(a, b)| Value::Float(a + b))
                    .ok_or_else(|| type_error("add", &left, &right)),
            },
            Sub => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => {
                    a.checked_sub(*b).map(Value::Int).ok_or_else(overflow)
                }
                _ => self
                    .float_pair(&left, &right)
                    .map(|(a, b)| Value::Float(a - b))
                    .ok_or_else(|| type_error("subtract", &left, &right)),
            },
            Mul => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => {
                    a.checked_mul(*b).map(Value::Int).ok_or_else(overflow)
                }
                _ => self
                    .float_pair(&left, &right)
                    .map(|(a, b)| Value::Float(a * b))
                    .ok_or_else(|| type_error("multiply", &left, &right)),
            },
            Div => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        Err(div_zero())
                    } else {
                        a.checked_div(*b).map(Value::Int).ok_or_else(overflow)
                    }
                }
                _ => match self.float_pair(&left, &right) {
                    Some((_, b)) if b == 0.0 => Err(div_zero()),
                    Some((a, b)) => Ok(Value::Float(a / b)),
                    None => Err(type_error("divide", &left, &right)),
                },
            },
            Rem => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        Err(div_zero())
                    } else {
                        a.checked_rem(*b).map(Value::Int).ok_or_else(overflow)
                    }
                }
                _ => match self.float_pair(&left, &right) {
                    Some((_, b)) if b == 0.0 => Err(div_zero()),
                    Some((a, b)) => Ok(Value::Float(a % b)),
                    None => Err(type_error("take the remainder of", &left, &right)),
                },
            },
            Eq => Ok(Value::Bool(left.script_eq(&right))),
            Ne => Ok(Value::Bool(!left.script_eq(&right))),
            Lt | Le | Gt | Ge => {
                let ordering = match (&left, &right) {
                    (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                    _ => self
                        .float_pair(&left, &right)
                        .and_then(|(a, b)| a.partial_cmp(&b)),
                }
                .ok_or_else(|| type_error("compare", &left, &right))?;
                let result = match op {
                    Lt => ordering.is_lt(),
                    Le => ordering.is_le(),
                    Gt => ordering.is_gt(),
                    Ge => ordering.is_ge(),
                    _ => unreachable!("non-ordering operator"),
                };
                Ok(Value::Bool(result))
            }
            And | Or => unreachable!("short-circuit operators are handled in eval"),
        }
    }

    fn float_pair(&self, left: &Value, right: &Value) -> Option<(f64, f64)> {
        let as_float = |v: &Value| match v {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        };
        Some((as_float(left)?, as_float(right)?))
    }
}

// ----------------------------------------------------------------------
// Builtins

fn builtin(name: &str) -> Option<Value> {
    let native = match name {
        "print" => NativeFunction {
            name: "print",
            call: builtin_print,
        },
        "str" => NativeFunction {
            name: "str",
            call: builtin_str,
        },
        "len" => NativeFunction {
            name: "len",
            call: builtin_len,
        },
        _ => return None,
    };
    Some(Value::Native(Rc::new(native)))
}

fn builtin_print(args: &[Value]) -> Result<Value, String> {
    let parts: Vec<String> = args.iter().map(|v| v.to_string()).collect();
    println!("{}", parts.join(" "));
    Ok(Value::Nil)
}

fn builtin_str(args: &[Value]) -> Result<Value, String> {
    match args {
        [value] => Ok(Value::Str(value.to_string())),
        _ => Err(format!("str() takes one argument, got {}", args.len())),
    }
}

fn builtin_len(args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
        [Value::List(items)] => Ok(Value::Int(items.borrow().len() as i64)),
        [other] => Err(format!("len() does not apply to a {}", other.type_name())),
        _ => Err(format!("len() takes one argument, got {}", args.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::env::Scope;
    use crate::script::parser::parse;

    fn run(source: &str) -> (Interp, ScopeRef) {
        let registry = Rc::new(NamespaceRegistry::new());
        run_with(source, registry)
    }

    fn run_with(source: &str, registry: Rc<NamespaceRegistry>) -> (Interp, ScopeRef) {
        let program = parse(source).expect("parse failed");
        let interp = Interp::new(registry);
        let scope = Scope::new();
        interp
            .run_module(&program, &scope)
            .expect("execution failed");
        (interp, scope)
    }

    fn run_err(source: &str) -> ScriptError {
        let registry = Rc::new(NamespaceRegistry::new());
        let program = parse(source).expect("parse failed");
        let interp = Interp::new(registry);
        let scope = Scope::new();
        interp.run_module(&program, &scope).unwrap_err()
    }

    fn get_int(scope: &ScopeRef, name: &str) -> i64 {
        match scope.get(name) {
            Some(Value::Int(n)) => n,
            other => panic!("expected int binding '{}', got {:?}", name, other),
        }
    }

    fn get_str(scope: &ScopeRef, name: &str) -> String {
        match scope.get(name) {
            Some(Value::Str(s)) => s,
            other => panic!("expected string binding '{}', got {:?}", name, other),
        }
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let (_, scope) = run("a = 1 + 2 * 3\nb = (1 + 2) * 3\nc = 7 % 4\nd = -a\n");
        assert_eq!(get_int(&scope, "a"), 7);
        assert_eq!(get_int(&scope, "b"), 9);
        assert_eq!(get_int(&scope, "c"), 3);
        assert_eq!(get_int(&scope, "d"), -7);
    }

    #[test]
    fn test_mixed_numeric_arithmetic() {
        let (_, scope) = run("x = 1 + 2.5\ny = 5 / 2\nz = 5.0 / 2\n");
        match scope.get("x") {
            Some(Value::Float(v)) => assert_eq!(v, 3.5),
            other => panic!("expected float, got {:?}", other),
        }
        assert_eq!(get_int(&scope, "y"), 2);
        match scope.get("z") {
            Some(Value::Float(v)) => assert_eq!(v, 2.5),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_string_concat_and_builtins() {
        let (_, scope) = run("s = \"foo\" + \"bar\"\nn = len(s)\nt = str(42)\n");
        assert_eq!(get_str(&scope, "s"), "foobar");
        assert_eq!(get_int(&scope, "n"), 6);
        assert_eq!(get_str(&scope, "t"), "42");
    }

    #[test]
    fn test_list_operations() {
        let (_, scope) = run("xs = [1, 2] + [3]\nn = len(xs)\nfirst = xs[0]\nxs[1] = 9\nsecond = xs[1]\n");
        assert_eq!(get_int(&scope, "n"), 3);
        assert_eq!(get_int(&scope, "first"), 1);
        assert_eq!(get_int(&scope, "second"), 9);
    }

    #[test]
    fn test_control_flow() {
        let (_, scope) = run(
            "total = 0\ni = 0\nwhile i < 5 {\n  if i % 2 == 0 {\n    total = total + i\n  }\n  i = i + 1\n}\n",
        );
        assert_eq!(get_int(&scope, "total"), 6);
    }

    #[test]
    fn test_short_circuit_yields_deciding_operand() {
        let (_, scope) = run("a = nil && boom()\nb = 3 || boom()\nc = false || \"x\"\n");
        assert!(matches!(scope.get("a"), Some(Value::Nil)));
        assert_eq!(get_int(&scope, "b"), 3);
        assert_eq!(get_str(&scope, "c"), "x");
    }

    #[test]
    fn test_functions_and_recursion() {
        let (_, scope) = run(
            "fn fib(n) {\n  if n < 2 {\n    return n\n  }\n  return fib(n - 1) + fib(n - 2)\n}\nresult = fib(10)\n",
        );
        assert_eq!(get_int(&scope, "result"), 55);
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        let (_, scope) = run("fn noop() {\n  1 + 1\n}\nr = noop()\n");
        assert!(matches!(scope.get("r"), Some(Value::Nil)));
    }

    #[test]
    fn test_classes_init_and_method_dispatch() {
        let source = "\
class Counter {
  fn init(self, start) {
    self.count = start
  }
  fn bump(self, n) {
    self.count = self.count + n
    return self.count
  }
}
c = Counter(10)
r = c.bump(5)
v = c.count
";
        let (_, scope) = run(source);
        assert_eq!(get_int(&scope, "r"), 15);
        assert_eq!(get_int(&scope, "v"), 15);
    }

    #[test]
    fn test_inheritance_and_explicit_base_call() {
        let source = "\
class Animal {
  fn init(self, name) {
    self.name = name
  }
  fn speak(self) {
    return \"...\"
  }
  fn describe(self) {
    return self.name + \" says \" + self.speak()
  }
}
class Dog(Animal) {
  fn init(self, name) {
    Animal.init(self, name)
  }
  fn speak(self) {
    return \"woof\"
  }
}
d = Dog(\"rex\")
r = d.describe()
";
        let (_, scope) = run(source);
        assert_eq!(get_str(&scope, "r"), "rex says woof");
    }

    #[test]
    fn test_class_constants() {
        let (_, scope) = run("class Config {\n  limit = 3\n}\nr = Config.limit\n");
        assert_eq!(get_int(&scope, "r"), 3);
    }

    #[test]
    fn test_instance_field_shadows_class_member() {
        let source = "\
class Box {
  label = \"class\"
}
b = Box()
before = b.label
b.label = \"mine\"
after = b.label
shared = Box.label
";
        let (_, scope) = run(source);
        assert_eq!(get_str(&scope, "before"), "class");
        assert_eq!(get_str(&scope, "after"), "mine");
        assert_eq!(get_str(&scope, "shared"), "class");
    }

    #[test]
    fn test_undefined_name_error() {
        let err = run_err("x = missing\n");
        assert!(err.message.contains("undefined name 'missing'"));
        assert_eq!(err.kind, ScriptErrorKind::Runtime);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_division_by_zero_error() {
        let err = run_err("x = 1 / 0\n");
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn test_arity_error() {
        let err = run_err("fn f(a) {\n  return a\n}\nf(1, 2)\n");
        assert!(err.message.contains("takes 1 argument(s), got 2"));
        assert_eq!(err.line, 4);
    }

    #[test]
    fn test_not_callable_error() {
        let err = run_err("x = 1\nx()\n");
        assert!(err.message.contains("not callable"));
    }

    #[test]
    fn test_missing_attribute_error() {
        let err = run_err("class A {\n}\na = A()\na.missing()\n");
        assert!(err.message.contains("no method 'missing'"));
    }

    #[test]
    fn test_call_depth_limit() {
        let err = run_err("fn f() {\n  return f()\n}\nf()\n");
        assert!(err.message.contains("call depth limit"));
        assert_eq!(err.kind, ScriptErrorKind::Runtime);
    }

    #[test]
    fn test_import_failure_is_recoverable_kind() {
        let err = run_err("import game.logic\n");
        assert!(err.is_import_failure());
        assert!(err.message.contains("game.logic"));
    }

    #[test]
    fn test_from_import_missing_name_is_import_failure() {
        let registry = Rc::new(NamespaceRegistry::new());
        registry.create_namespace("game").expect("create");
        let program = parse("from game import Missing\n").expect("parse failed");
        let interp = Interp::new(Rc::clone(&registry));
        let scope = Scope::new();
        let err = interp.run_module(&program, &scope).unwrap_err();
        assert!(err.is_import_failure());
    }

    #[test]
    fn test_import_binds_namespace_and_reads_through() {
        let registry = Rc::new(NamespaceRegistry::new());
        let node = registry.create_namespace("game.logic").expect("create");
        registry.insert_attribute(
            &node,
            "LIMIT",
            Value::Int(12),
            std::path::Path::new("/tmp/logic.ember"),
            &rustc_hash::FxHashSet::default(),
        );
        let (_, scope) = run_with(
            "import game.logic\nx = logic.LIMIT\nfrom game.logic import LIMIT\n",
            registry,
        );
        assert_eq!(get_int(&scope, "x"), 12);
        assert_eq!(get_int(&scope, "LIMIT"), 12);
    }

    #[test]
    fn test_namespace_attributes_are_read_only() {
        let registry = Rc::new(NamespaceRegistry::new());
        registry.create_namespace("game").expect("create");
        let program = parse("import game\ngame.X = 1\n").expect("parse failed");
        let interp = Interp::new(registry);
        let scope = Scope::new();
        let err = interp.run_module(&program, &scope).unwrap_err();
        assert!(err.message.contains("read-only"));
    }

    #[test]
    fn test_function_reads_module_scope_at_call_time() {
        let (interp, scope) = run("LIMIT = 1\nfn get() {\n  return LIMIT\n}\n");
        scope.set("LIMIT", Value::Int(99));
        let func = match scope.get("get") {
            Some(Value::Function(f)) => f,
            other => panic!("expected function, got {:?}", other),
        };
        match interp.call_function(&func, &[]).expect("call failed") {
            Value::Int(99) => {}
            other => panic!("expected updated module binding, got {:?}", other),
        }
    }
}
